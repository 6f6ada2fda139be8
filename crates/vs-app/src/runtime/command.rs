use tokio::sync::oneshot;

use vs_core::{Diff, Digest, DeviceId, MessageId, NegotiationStatus, RelayId, TransportStatus};

use crate::usecases::connection::ConnectError;
use crate::usecases::reconciliation::{PeerSyncState, SendError};

/// Requests from [`super::SyncHandle`] to the runtime loop.
#[derive(Debug)]
pub enum SyncCommand {
    Connect {
        device_id: DeviceId,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    Disconnect {
        device_id: DeviceId,
        reply: oneshot::Sender<bool>,
    },
    RequestSync {
        device_id: DeviceId,
        reply: oneshot::Sender<Result<MessageId, SendError>>,
    },
    SubmitManualSolve {
        device_id: DeviceId,
        diffs: Vec<Diff>,
        reply: oneshot::Sender<Result<MessageId, SendError>>,
    },
    ApplyManualSynchronization {
        diffs: Vec<Diff>,
        reply: oneshot::Sender<anyhow::Result<Digest>>,
    },
    PeerStatus {
        device_id: DeviceId,
        reply: oneshot::Sender<Option<TransportStatus>>,
    },
    RelayStatus {
        relay_id: RelayId,
        reply: oneshot::Sender<Option<NegotiationStatus>>,
    },
    SyncState {
        device_id: DeviceId,
        reply: oneshot::Sender<Option<PeerSyncState>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
