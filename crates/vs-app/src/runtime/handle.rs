use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};

use vs_core::{
    Diff, Digest, DeviceId, MessageId, NegotiationStatus, RelayId, SubscriptionId, SyncEvent,
    TransportStatus,
};

use super::command::SyncCommand;
use crate::events::EventBroadcaster;
use crate::usecases::reconciliation::PeerSyncState;

/// Cloneable command surface of a running [`super::SyncRuntime`].
///
/// Refusals keep their typed error inside the returned [`anyhow::Error`];
/// use `downcast_ref::<ConnectError>()` or `downcast_ref::<SendError>()`.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
    broadcaster: EventBroadcaster,
}

impl SyncHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<SyncCommand>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            commands,
            broadcaster,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SyncCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| anyhow!("sync runtime has stopped"))?;
        response
            .await
            .map_err(|_| anyhow!("sync runtime dropped the request"))
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn subscribe_relay<F>(&self, relay_id: impl Into<RelayId>, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe_relay(relay_id.into(), callback)
    }

    pub fn subscribe_device<F>(&self, device_id: impl Into<DeviceId>, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe_device(device_id.into(), callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub async fn connect_device(&self, device_id: impl Into<DeviceId>) -> Result<()> {
        let device_id = device_id.into();
        self.request(|reply| SyncCommand::Connect { device_id, reply })
            .await?
            .map_err(Into::into)
    }

    /// Returns whether a connection existed.
    pub async fn disconnect_device(&self, device_id: impl Into<DeviceId>) -> Result<bool> {
        let device_id = device_id.into();
        self.request(|reply| SyncCommand::Disconnect { device_id, reply })
            .await
    }

    /// Announce the local digest to a connected device.
    pub async fn request_sync(&self, device_id: impl Into<DeviceId>) -> Result<MessageId> {
        let device_id = device_id.into();
        self.request(|reply| SyncCommand::RequestSync { device_id, reply })
            .await?
            .map_err(Into::into)
    }

    /// Send a resolved diff set to a connected device.
    pub async fn submit_manual_solve(
        &self,
        device_id: impl Into<DeviceId>,
        diffs: Vec<Diff>,
    ) -> Result<MessageId> {
        let device_id = device_id.into();
        self.request(|reply| SyncCommand::SubmitManualSolve {
            device_id,
            diffs,
            reply,
        })
        .await?
        .map_err(Into::into)
    }

    /// Commit a resolved diff set into the local vault.
    pub async fn apply_manual_synchronization(&self, diffs: Vec<Diff>) -> Result<Digest> {
        self.request(|reply| SyncCommand::ApplyManualSynchronization { diffs, reply })
            .await?
    }

    pub async fn peer_status(
        &self,
        device_id: impl Into<DeviceId>,
    ) -> Result<Option<TransportStatus>> {
        let device_id = device_id.into();
        self.request(|reply| SyncCommand::PeerStatus { device_id, reply })
            .await
    }

    pub async fn relay_status(
        &self,
        relay_id: impl Into<RelayId>,
    ) -> Result<Option<NegotiationStatus>> {
        let relay_id = relay_id.into();
        self.request(|reply| SyncCommand::RelayStatus { relay_id, reply })
            .await
    }

    pub async fn sync_state(
        &self,
        device_id: impl Into<DeviceId>,
    ) -> Result<Option<PeerSyncState>> {
        let device_id = device_id.into();
        self.request(|reply| SyncCommand::SyncState { device_id, reply })
            .await
    }

    /// Close every connection and stop the runtime.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SyncCommand::Shutdown { reply }).await
    }
}
