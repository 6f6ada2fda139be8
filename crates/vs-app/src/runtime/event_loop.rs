//! Sync runtime
//!
//! A single task owns the connection manager and the reconciliation engine.
//! Relay events, transport events and handle commands are consumed one at a
//! time, so every inbound frame is processed to completion (replies
//! included) before the next event of any device is looked at.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use vs_core::ports::{
    DeviceRegistryPort, HashDiffPort, PeerEnvelope, PeerTransportFactoryPort, RelayConnectorPort,
    RelayEnvelope, VaultStatePort,
};
use vs_core::SyncConfig;

use super::command::SyncCommand;
use super::handle::SyncHandle;
use crate::events::EventBroadcaster;
use crate::usecases::connection::{PeerConnectionManager, PeerSignal};
use crate::usecases::negotiation::NegotiationHub;
use crate::usecases::reconciliation::ReconciliationEngine;

/// Collaborators the runtime is assembled from.
pub struct SyncDeps {
    pub config: SyncConfig,
    pub registry: Arc<dyn DeviceRegistryPort>,
    pub vault: Arc<dyn VaultStatePort>,
    pub hash_diff: Arc<dyn HashDiffPort>,
    pub relay_connector: Arc<dyn RelayConnectorPort>,
    pub transport_factory: Arc<dyn PeerTransportFactoryPort>,
}

pub struct SyncRuntime {
    config: Arc<SyncConfig>,
    connections: PeerConnectionManager,
    engine: ReconciliationEngine,
    relay_rx: mpsc::UnboundedReceiver<RelayEnvelope>,
    peer_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
    command_rx: mpsc::UnboundedReceiver<SyncCommand>,
}

impl SyncRuntime {
    pub fn new(deps: SyncDeps) -> (Self, SyncHandle) {
        let config = Arc::new(deps.config);
        let broadcaster = EventBroadcaster::new();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let local = deps.registry.local_replica();
        let hub = NegotiationHub::new(
            deps.relay_connector,
            relay_tx,
            broadcaster.clone(),
            local.device_id,
        );
        let connections = PeerConnectionManager::new(
            config.clone(),
            deps.registry,
            deps.transport_factory,
            hub,
            peer_tx,
            broadcaster.clone(),
        );
        let engine = ReconciliationEngine::new(
            deps.vault,
            deps.hash_diff,
            broadcaster.clone(),
            config.max_message_bytes,
        );

        let runtime = Self {
            config,
            connections,
            engine,
            relay_rx,
            peer_rx,
            command_rx,
        };
        (runtime, SyncHandle::new(command_tx, broadcaster))
    }

    /// Build the runtime and run it on the current tokio runtime.
    pub fn spawn(deps: SyncDeps) -> (JoinHandle<()>, SyncHandle) {
        let (runtime, handle) = Self::new(deps);
        (tokio::spawn(runtime.run()), handle)
    }

    /// Run until shut down or until every handle is dropped. All connections
    /// are closed on the way out.
    pub async fn run(mut self) {
        tracing::info!("sync runtime started");
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(SyncCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(envelope) = self.relay_rx.recv() => {
                    self.connections.handle_relay_event(envelope).await;
                }
                Some(envelope) = self.peer_rx.recv() => {
                    self.handle_peer_event(envelope).await;
                }
            }
        }

        self.connections.disconnect_all().await;
        tracing::info!("sync runtime stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_peer_event(&mut self, envelope: PeerEnvelope) {
        let Some(signal) = self.connections.handle_peer_event(envelope).await else {
            return;
        };

        match signal {
            PeerSignal::ChannelReady { device_id, initiator } => {
                tracing::info!(%device_id, initiator, "data channel ready");
                if initiator && self.config.sync_on_connect {
                    let channel = self.connections.data_channel(&device_id);
                    if let Err(err) = self.engine.transmit_sync_request(&device_id, channel).await {
                        tracing::warn!(%device_id, error = %err, "initial sync request not sent");
                    }
                }
            }
            PeerSignal::Message { device_id, data } => {
                let channel = self.connections.data_channel(&device_id);
                self.engine.handle_message(&device_id, channel, &data).await;
            }
        }
    }

    async fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Connect { device_id, reply } => {
                let result = self.connections.connect_device(&device_id).await;
                if let Err(err) = &result {
                    tracing::warn!(%device_id, error = %err, "connect refused");
                }
                let _ = reply.send(result);
            }
            SyncCommand::Disconnect { device_id, reply } => {
                let removed = self.connections.disconnect_device(&device_id).await;
                self.engine.forget(&device_id);
                let _ = reply.send(removed);
            }
            SyncCommand::RequestSync { device_id, reply } => {
                let span = info_span!("runtime.request_sync", device_id = %device_id);
                let channel = self.connections.data_channel(&device_id);
                let result = self
                    .engine
                    .transmit_sync_request(&device_id, channel)
                    .instrument(span)
                    .await;
                let _ = reply.send(result);
            }
            SyncCommand::SubmitManualSolve {
                device_id,
                diffs,
                reply,
            } => {
                let span = info_span!("runtime.manual_solve", device_id = %device_id);
                let channel = self.connections.data_channel(&device_id);
                let result = self
                    .engine
                    .transmit_manual_sync_solve(&device_id, channel, diffs)
                    .instrument(span)
                    .await;
                let _ = reply.send(result);
            }
            SyncCommand::ApplyManualSynchronization { diffs, reply } => {
                let result = self.engine.apply_manual_synchronization(diffs).await;
                let _ = reply.send(result);
            }
            SyncCommand::PeerStatus { device_id, reply } => {
                let _ = reply.send(self.connections.status(&device_id));
            }
            SyncCommand::RelayStatus { relay_id, reply } => {
                let _ = reply.send(self.connections.hub().status(&relay_id));
            }
            SyncCommand::SyncState { device_id, reply } => {
                let _ = reply.send(self.engine.sync_state(&device_id).cloned());
            }
            SyncCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}
