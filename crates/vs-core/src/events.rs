//! Events fanned out to observers.

use crate::ids::{DeviceId, RelayId};
use crate::network::{NegotiationStatus, TransportStatus};
use crate::reconciliation::{Credential, Diff, Digest, ReconciliationMessage};

/// Outcome of one reconciliation step with a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both replicas hold `hash`.
    Synchronized { hash: Digest },
    /// The peer's full state arrived; a caller has to resolve the merge.
    ManualMergeNeeded { diffs: Vec<Diff> },
    /// Integrity failure. Local state is untouched.
    Error {
        message: String,
        offending: Option<Box<ReconciliationMessage>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    NegotiationStatusChanged {
        relay_id: RelayId,
        status: NegotiationStatus,
    },
    TransportStatusChanged {
        device_id: DeviceId,
        status: TransportStatus,
    },
    Reconciliation {
        device_id: DeviceId,
        outcome: ReconcileOutcome,
    },
    /// The local credential list changed. `source` is the peer whose diffs
    /// were committed, `None` for a locally resolved merge.
    VaultUpdated {
        source: Option<DeviceId>,
        credentials: Vec<Credential>,
    },
    /// Non-fatal problem, e.g. a send without an open data channel.
    Warning {
        device_id: DeviceId,
        message: String,
    },
}

impl SyncEvent {
    pub fn relay_id(&self) -> Option<&RelayId> {
        match self {
            Self::NegotiationStatusChanged { relay_id, .. } => Some(relay_id),
            _ => None,
        }
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::TransportStatusChanged { device_id, .. }
            | Self::Reconciliation { device_id, .. }
            | Self::Warning { device_id, .. } => Some(device_id),
            Self::VaultUpdated { source, .. } => source.as_ref(),
            Self::NegotiationStatusChanged { .. } => None,
        }
    }
}
