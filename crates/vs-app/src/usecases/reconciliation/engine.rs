//! Reconciliation engine
//!
//! Executes the actions chosen by [`vs_core::reconciliation::plan`] against
//! the local vault and a peer's data channel.
//!
//! # Architecture
//!
//! ```text
//! inbound frame
//!   ↓ decode
//! ReconciliationMessage
//!   ↓ plan (pure)
//! ReconcilePlan ──LookupDiffsSince──→ HashDiffPort::diffs_since_hash
//!   ↓
//! ReconcileAction (executed here)
//!   ↓
//! vault commit / outbound frame / broadcast event
//! ```
//!
//! Every commit is verified first: the diffs are applied to a copy of the
//! current credential set and the resulting digest must equal the one the
//! peer announced.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info_span, Instrument};

use vs_core::ports::{DataChannelPort, HashDiffPort, VaultStatePort};
use vs_core::reconciliation::{
    plan, wire, Command, IgnoreReason, ReconcileAction, ReconcilePlan, VaultSnapshot,
};
use vs_core::{
    Credential, DeviceId, Diff, Digest, MessageId, ReconcileOutcome, ReconciliationMessage,
    SyncEvent,
};

use super::error::{CommitError, SendError};
use crate::events::EventBroadcaster;

/// Per-device reconciliation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSyncState {
    /// Digest both sides agreed on most recently.
    pub last_synced_hash: Option<Digest>,
    pub synchronized: bool,
}

pub struct ReconciliationEngine {
    vault: Arc<dyn VaultStatePort>,
    hash_diff: Arc<dyn HashDiffPort>,
    broadcaster: EventBroadcaster,
    max_message_bytes: usize,
    peers: HashMap<DeviceId, PeerSyncState>,
}

impl ReconciliationEngine {
    pub fn new(
        vault: Arc<dyn VaultStatePort>,
        hash_diff: Arc<dyn HashDiffPort>,
        broadcaster: EventBroadcaster,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            vault,
            hash_diff,
            broadcaster,
            max_message_bytes,
            peers: HashMap::new(),
        }
    }

    pub fn sync_state(&self, device_id: &DeviceId) -> Option<&PeerSyncState> {
        self.peers.get(device_id)
    }

    pub fn forget(&mut self, device_id: &DeviceId) {
        self.peers.remove(device_id);
    }

    /// Digest of the current local credential set.
    pub async fn local_hash(&self) -> Result<Digest, vs_core::ports::VaultError> {
        let snapshot = self.vault.snapshot().await?;
        Ok(self.hash_diff.hash_credentials(&snapshot.credentials).await)
    }

    /// Start reconciliation: announce the local digest without diffs.
    pub async fn transmit_sync_request(
        &mut self,
        device_id: &DeviceId,
        channel: Option<Arc<dyn DataChannelPort>>,
    ) -> Result<MessageId, SendError> {
        let hash = self.local_hash().await?;
        let id = MessageId::generate();
        let message = ReconciliationMessage::sync_request(id.clone(), hash, Vec::new());
        self.send(device_id, channel.as_deref(), &message).await?;
        self.peers.entry(device_id.clone()).or_default().synchronized = false;
        Ok(id)
    }

    /// Push a caller-resolved diff set, announcing the local digest as the
    /// target the peer must reach.
    pub async fn transmit_manual_sync_solve(
        &mut self,
        device_id: &DeviceId,
        channel: Option<Arc<dyn DataChannelPort>>,
        diffs: Vec<Diff>,
    ) -> Result<MessageId, SendError> {
        let hash = self.local_hash().await?;
        let id = MessageId::generate();
        let message = ReconciliationMessage::manual_solve(id.clone(), hash, diffs);
        self.send(device_id, channel.as_deref(), &message).await?;
        Ok(id)
    }

    /// Commit a diff set the local user resolved, without any peer check.
    pub async fn apply_manual_synchronization(&mut self, diffs: Vec<Diff>) -> Result<Digest> {
        let span = info_span!("reconcile.apply_manual", diffs = diffs.len());
        async {
            let snapshot = self.vault.snapshot().await?;
            let applied = self
                .hash_diff
                .apply_diffs(&snapshot.credentials, &diffs)
                .await?;
            let hash = self.hash_diff.hash_credentials(&applied.credentials).await;
            self.vault
                .commit(applied.credentials.clone(), applied.diffs)
                .await?;

            for state in self.peers.values_mut() {
                state.synchronized = false;
            }
            tracing::info!(%hash, "manual synchronization applied");
            self.broadcaster.publish(SyncEvent::VaultUpdated {
                source: None,
                credentials: applied.credentials,
            });
            Ok(hash)
        }
        .instrument(span)
        .await
    }

    /// Process one inbound frame to completion, including any reply.
    pub async fn handle_message(
        &mut self,
        device_id: &DeviceId,
        channel: Option<Arc<dyn DataChannelPort>>,
        data: &[u8],
    ) {
        let message = match wire::decode(data, self.max_message_bytes) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    %device_id,
                    error = %err,
                    "undecodable reconciliation frame dropped"
                );
                self.report_error(
                    device_id,
                    format!("malformed reconciliation message: {err}"),
                    None,
                );
                return;
            }
        };

        let span = info_span!(
            "reconcile.handle",
            device_id = %device_id,
            command = %message.command_name(),
            id = %message.id(),
        );
        self.handle_decoded(device_id, channel.as_deref(), message)
            .instrument(span)
            .await
    }

    async fn handle_decoded(
        &mut self,
        device_id: &DeviceId,
        channel: Option<&dyn DataChannelPort>,
        message: ReconciliationMessage,
    ) {
        // Each message is planned against the vault as it is now.
        let snapshot = match self.vault.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.report_error(device_id, format!("vault unavailable: {err}"), Some(message));
                return;
            }
        };
        let local_hash = self.hash_diff.hash_credentials(&snapshot.credentials).await;
        let offending = message.clone();

        let action = match plan(message, &local_hash) {
            ReconcilePlan::Ready(action) => action,
            ReconcilePlan::LookupDiffsSince { since, then } => {
                let diffs = self.hash_diff.diffs_since_hash(&since, &snapshot.diff_log);
                tracing::debug!(%since, found = diffs.len(), "diffs since peer digest");
                then.resolve(diffs)
            }
        };

        tracing::debug!(?action, %local_hash, "reconcile action");
        self.execute(device_id, channel, action, offending, snapshot, local_hash)
            .await;
    }

    async fn execute(
        &mut self,
        device_id: &DeviceId,
        channel: Option<&dyn DataChannelPort>,
        action: ReconcileAction,
        offending: ReconciliationMessage,
        snapshot: VaultSnapshot,
        local_hash: Digest,
    ) {
        match action {
            ReconcileAction::Converged { reply } => {
                if let Some(reply) = reply {
                    if self.send(device_id, channel, &reply).await.is_err() {
                        return;
                    }
                }
                self.mark_synchronized(device_id, local_hash);
            }
            ReconcileAction::CommitAndAck { id, target, diffs } => {
                let failure_message = match offending.command() {
                    Some(Command::ManualSyncSolve) => "could not apply the manual synchronization",
                    _ => "could not apply the synchronization request",
                };
                match self.verify_and_commit(snapshot, &target, &diffs).await {
                    Ok((hash, credentials)) => {
                        tracing::info!(%hash, applied = diffs.len(), "diffs committed");
                        self.broadcaster.publish(SyncEvent::VaultUpdated {
                            source: Some(device_id.clone()),
                            credentials,
                        });
                        self.mark_synchronized(device_id, hash.clone());
                        let ack = ReconciliationMessage::sync_request(id, hash, Vec::new());
                        let _ = self.send(device_id, channel, &ack).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "verify-then-commit rejected");
                        self.report_error(device_id, failure_message.to_string(), Some(offending));
                    }
                }
            }
            ReconcileAction::PushDiffs { message } | ReconcileAction::Reply { message } => {
                let _ = self.send(device_id, channel, &message).await;
            }
            ReconcileAction::RequestManualMerge { id } => {
                tracing::info!("replicas diverged, requesting full state");
                self.mark_unsynchronized(device_id);
                let request = ReconciliationMessage::manual_data_request(id);
                let _ = self.send(device_id, channel, &request).await;
            }
            ReconcileAction::SendFullState { id } => {
                let diffs = self.hash_diff.credentials_as_diffs(&snapshot.credentials).await;
                let response = ReconciliationMessage::sync_response(id, None, diffs);
                let _ = self.send(device_id, channel, &response).await;
            }
            ReconcileAction::ManualMergeNeeded { diffs, .. } => {
                tracing::info!(diffs = diffs.len(), "manual synchronization necessary");
                self.mark_unsynchronized(device_id);
                self.broadcaster.publish(SyncEvent::Reconciliation {
                    device_id: device_id.clone(),
                    outcome: ReconcileOutcome::ManualMergeNeeded { diffs },
                });
            }
            ReconcileAction::Ignore { reason } => match reason {
                IgnoreReason::UnknownCommand(code) => {
                    tracing::warn!(code, "unknown reconciliation command ignored");
                }
                IgnoreReason::EmptyResponse => {
                    tracing::debug!("empty full-state response ignored");
                }
            },
        }
    }

    async fn verify_and_commit(
        &self,
        snapshot: VaultSnapshot,
        target: &Digest,
        diffs: &[Diff],
    ) -> Result<(Digest, Vec<Credential>), CommitError> {
        let mocked = self
            .hash_diff
            .calculate_mocked_vault_hash(&snapshot.credentials, diffs)
            .await?;
        if mocked != *target {
            return Err(CommitError::DigestMismatch {
                expected: target.clone(),
                actual: mocked,
            });
        }

        let applied = self.hash_diff.apply_diffs(&snapshot.credentials, diffs).await?;
        let hash = self.hash_diff.hash_credentials(&applied.credentials).await;
        self.vault
            .commit(applied.credentials.clone(), applied.diffs)
            .await?;
        Ok((hash, applied.credentials))
    }

    async fn send(
        &self,
        device_id: &DeviceId,
        channel: Option<&dyn DataChannelPort>,
        message: &ReconciliationMessage,
    ) -> Result<(), SendError> {
        let Some(channel) = channel else {
            tracing::warn!(%device_id, command = %message.command_name(), "no open data channel");
            self.broadcaster.publish(SyncEvent::Warning {
                device_id: device_id.clone(),
                message: format!("cannot send {}: no open data channel", message.command_name()),
            });
            return Err(SendError::NoOpenChannel(device_id.clone()));
        };

        let frame = wire::encode(message, self.max_message_bytes).map_err(|err| {
            tracing::error!(%device_id, error = %err, "reconciliation frame not encodable");
            self.broadcaster.publish(SyncEvent::Warning {
                device_id: device_id.clone(),
                message: format!("cannot send {}: {err}", message.command_name()),
            });
            SendError::from(err)
        })?;

        tracing::debug!(
            %device_id,
            command = %message.command_name(),
            id = %message.id(),
            bytes = frame.len(),
            "sending reconciliation frame"
        );
        channel.send(frame).await.map_err(|err| {
            tracing::warn!(%device_id, error = %err, "data channel send failed");
            SendError::Transport(err)
        })
    }

    fn mark_synchronized(&mut self, device_id: &DeviceId, hash: Digest) {
        let state = self.peers.entry(device_id.clone()).or_default();
        state.last_synced_hash = Some(hash.clone());
        state.synchronized = true;
        self.broadcaster.publish(SyncEvent::Reconciliation {
            device_id: device_id.clone(),
            outcome: ReconcileOutcome::Synchronized { hash },
        });
    }

    fn mark_unsynchronized(&mut self, device_id: &DeviceId) {
        self.peers.entry(device_id.clone()).or_default().synchronized = false;
    }

    fn report_error(
        &self,
        device_id: &DeviceId,
        message: String,
        offending: Option<ReconciliationMessage>,
    ) {
        self.broadcaster.publish(SyncEvent::Reconciliation {
            device_id: device_id.clone(),
            outcome: ReconcileOutcome::Error {
                message,
                offending: offending.map(Box::new),
            },
        });
    }
}
