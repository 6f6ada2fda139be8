use crate::ids::MessageId;

use super::types::{Diff, Digest};
use super::wire::WireMessage;

/// Reconciliation commands and their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SyncRequest,
    SyncResponse,
    ManualSyncDataRequest,
    ManualSyncSolve,
}

impl Command {
    pub fn code(self) -> u32 {
        match self {
            Self::SyncRequest => 0,
            Self::SyncResponse => 1,
            Self::ManualSyncDataRequest => 2,
            Self::ManualSyncSolve => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::SyncRequest),
            1 => Some(Self::SyncResponse),
            2 => Some(Self::ManualSyncDataRequest),
            3 => Some(Self::ManualSyncSolve),
            _ => None,
        }
    }
}

/// "This is my digest", optionally with the diffs that get you there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub id: MessageId,
    pub hash: Digest,
    pub diffs: Vec<Diff>,
}

/// Answer to a request. Without a hash it carries a manual-merge payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    pub id: MessageId,
    pub hash: Option<Digest>,
    pub diffs: Vec<Diff>,
}

/// Asks the peer for its whole credential set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSyncDataRequest {
    pub id: MessageId,
}

/// A caller-resolved merge to verify and commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSyncSolve {
    pub id: MessageId,
    pub hash: Digest,
    pub diffs: Vec<Diff>,
}

/// A command this build does not know. The flat wire form is kept so the
/// message re-encodes exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    pub wire: WireMessage,
}

impl UnknownMessage {
    pub fn command_code(&self) -> u32 {
        self.wire.command
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationMessage {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
    ManualSyncDataRequest(ManualSyncDataRequest),
    ManualSyncSolve(ManualSyncSolve),
    Unknown(UnknownMessage),
}

impl ReconciliationMessage {
    pub fn sync_request(id: MessageId, hash: Digest, diffs: Vec<Diff>) -> Self {
        Self::SyncRequest(SyncRequest { id, hash, diffs })
    }

    pub fn sync_response(id: MessageId, hash: Option<Digest>, diffs: Vec<Diff>) -> Self {
        Self::SyncResponse(SyncResponse { id, hash, diffs })
    }

    pub fn manual_data_request(id: MessageId) -> Self {
        Self::ManualSyncDataRequest(ManualSyncDataRequest { id })
    }

    pub fn manual_solve(id: MessageId, hash: Digest, diffs: Vec<Diff>) -> Self {
        Self::ManualSyncSolve(ManualSyncSolve { id, hash, diffs })
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::SyncRequest(m) => m.id.clone(),
            Self::SyncResponse(m) => m.id.clone(),
            Self::ManualSyncDataRequest(m) => m.id.clone(),
            Self::ManualSyncSolve(m) => m.id.clone(),
            Self::Unknown(m) => MessageId::new(m.wire.id.clone()),
        }
    }

    /// Known command of this message, `None` for unknown codes.
    pub fn command(&self) -> Option<Command> {
        match self {
            Self::SyncRequest(_) => Some(Command::SyncRequest),
            Self::SyncResponse(_) => Some(Command::SyncResponse),
            Self::ManualSyncDataRequest(_) => Some(Command::ManualSyncDataRequest),
            Self::ManualSyncSolve(_) => Some(Command::ManualSyncSolve),
            Self::Unknown(_) => None,
        }
    }

    pub fn command_name(&self) -> String {
        match self {
            Self::SyncRequest(_) => "SyncRequest".to_string(),
            Self::SyncResponse(_) => "SyncResponse".to_string(),
            Self::ManualSyncDataRequest(_) => "ManualSyncDataRequest".to_string(),
            Self::ManualSyncSolve(_) => "ManualSyncSolve".to_string(),
            Self::Unknown(m) => format!("Unknown({})", m.command_code()),
        }
    }
}
