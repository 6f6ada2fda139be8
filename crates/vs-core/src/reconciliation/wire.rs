//! Binary wire format of reconciliation messages.
//!
//! Frame: bincode encoding of the flat [`WireMessage`], one frame per
//! data-channel message. The flat layout is the compatibility contract
//! between independently updated devices: every field is always present and
//! `command` is a plain integer, so codes added later decode here as
//! [`ReconciliationMessage::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::LinkedDeviceRecord;
use crate::ids::MessageId;

use super::message::{
    Command, ManualSyncDataRequest, ManualSyncSolve, ReconciliationMessage, SyncRequest,
    SyncResponse, UnknownMessage,
};
use super::types::{Diff, Digest};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to serialize reconciliation message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to deserialize reconciliation message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("{command:?} message {id} carries no hash")]
    MissingHash { command: Command, id: String },
}

/// Flat on-wire layout of a reconciliation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub command: u32,
    pub hash: Option<String>,
    pub diffs: Vec<Diff>,
    pub linked_devices: Vec<LinkedDeviceRecord>,
}

impl From<&ReconciliationMessage> for WireMessage {
    fn from(message: &ReconciliationMessage) -> Self {
        let flat = |id: &MessageId, command: Command, hash: Option<&Digest>, diffs: &[Diff]| {
            WireMessage {
                id: id.as_str().to_string(),
                command: command.code(),
                hash: hash.map(|h| h.as_str().to_string()),
                diffs: diffs.to_vec(),
                linked_devices: Vec::new(),
            }
        };

        match message {
            ReconciliationMessage::SyncRequest(m) => {
                flat(&m.id, Command::SyncRequest, Some(&m.hash), &m.diffs)
            }
            ReconciliationMessage::SyncResponse(m) => {
                flat(&m.id, Command::SyncResponse, m.hash.as_ref(), &m.diffs)
            }
            ReconciliationMessage::ManualSyncDataRequest(m) => {
                flat(&m.id, Command::ManualSyncDataRequest, None, &[])
            }
            ReconciliationMessage::ManualSyncSolve(m) => {
                flat(&m.id, Command::ManualSyncSolve, Some(&m.hash), &m.diffs)
            }
            ReconciliationMessage::Unknown(m) => m.wire.clone(),
        }
    }
}

impl TryFrom<WireMessage> for ReconciliationMessage {
    type Error = WireError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let Some(command) = Command::from_code(wire.command) else {
            return Ok(Self::Unknown(UnknownMessage { wire }));
        };

        #[cfg(feature = "tracing")]
        if !wire.linked_devices.is_empty() {
            tracing::debug!(
                count = wire.linked_devices.len(),
                "ignoring legacy linked device list on reconciliation message"
            );
        }

        let id = MessageId::new(wire.id);
        let hash = wire.hash.map(Digest::new);
        let require_hash = |hash: Option<Digest>, id: &MessageId| {
            hash.ok_or_else(|| WireError::MissingHash {
                command,
                id: id.as_str().to_string(),
            })
        };

        let message = match command {
            Command::SyncRequest => Self::SyncRequest(SyncRequest {
                hash: require_hash(hash, &id)?,
                id,
                diffs: wire.diffs,
            }),
            Command::SyncResponse => Self::SyncResponse(SyncResponse {
                id,
                hash,
                diffs: wire.diffs,
            }),
            Command::ManualSyncDataRequest => {
                Self::ManualSyncDataRequest(ManualSyncDataRequest { id })
            }
            Command::ManualSyncSolve => Self::ManualSyncSolve(ManualSyncSolve {
                hash: require_hash(hash, &id)?,
                id,
                diffs: wire.diffs,
            }),
        };

        Ok(message)
    }
}

/// Serialize a message into one frame.
pub fn encode(message: &ReconciliationMessage, max_bytes: usize) -> Result<Vec<u8>, WireError> {
    let wire = WireMessage::from(message);
    let payload = bincode::serialize(&wire).map_err(WireError::Encode)?;

    if payload.len() > max_bytes {
        return Err(WireError::TooLarge {
            size: payload.len(),
            max: max_bytes,
        });
    }

    Ok(payload)
}

/// Deserialize one frame, mapping the flat form onto its variant.
pub fn decode(bytes: &[u8], max_bytes: usize) -> Result<ReconciliationMessage, WireError> {
    if bytes.len() > max_bytes {
        return Err(WireError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    let wire: WireMessage = bincode::deserialize(bytes).map_err(WireError::Decode)?;
    ReconciliationMessage::try_from(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_MESSAGE_BYTES as MAX;

    fn diff(hash: &str) -> Diff {
        Diff::new(Digest::from(hash), b"change".to_vec())
    }

    #[test]
    fn test_sync_request_survives_the_wire() {
        let msg = ReconciliationMessage::sync_request(
            MessageId::new("m-1"),
            Digest::from("abc"),
            vec![diff("xyz")],
        );

        let bytes = encode(&msg, MAX).unwrap();
        assert_eq!(decode(&bytes, MAX).unwrap(), msg);
    }

    #[test]
    fn test_manual_data_request_has_no_hash_on_wire() {
        let msg = ReconciliationMessage::manual_data_request(MessageId::new("m-2"));
        let wire = WireMessage::from(&msg);
        assert_eq!(wire.command, 2);
        assert!(wire.hash.is_none());
        assert!(wire.diffs.is_empty());
    }

    #[test]
    fn test_unknown_command_decodes_and_reencodes_identically() {
        let wire = WireMessage {
            id: "future".to_string(),
            command: 99,
            hash: Some("abc".to_string()),
            diffs: vec![diff("d")],
            linked_devices: vec![LinkedDeviceRecord {
                id: "dev".to_string(),
                name: "Laptop".to_string(),
            }],
        };
        let bytes = bincode::serialize(&wire).unwrap();

        let msg = decode(&bytes, MAX).unwrap();
        match &msg {
            ReconciliationMessage::Unknown(unknown) => assert_eq!(unknown.command_code(), 99),
            other => panic!("expected unknown message, got {other:?}"),
        }
        assert_eq!(encode(&msg, MAX).unwrap(), bytes);
    }

    #[test]
    fn test_sync_request_without_hash_is_rejected() {
        let wire = WireMessage {
            id: "m-3".to_string(),
            command: Command::SyncRequest.code(),
            hash: None,
            diffs: Vec::new(),
            linked_devices: Vec::new(),
        };
        let bytes = bincode::serialize(&wire).unwrap();

        assert!(matches!(
            decode(&bytes, MAX),
            Err(WireError::MissingHash {
                command: Command::SyncRequest,
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_frames_are_rejected() {
        let msg = ReconciliationMessage::sync_request(
            MessageId::new("m-4"),
            Digest::from("abc"),
            vec![Diff::new(Digest::from("h"), vec![0u8; 128])],
        );

        assert!(matches!(encode(&msg, 64), Err(WireError::TooLarge { .. })));
        assert!(matches!(decode(&[0u8; 65], 64), Err(WireError::TooLarge { .. })));
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(matches!(decode(&[1, 2, 3], MAX), Err(WireError::Decode(_))));
    }
}
