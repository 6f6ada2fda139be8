//! Negotiation channels: one live relay connection per relay id, shared by
//! every device that negotiates through it.
//!
//! The hub owns the relay connections and the mapping from per-pair channel
//! name to device. Relay events are routed back to the owning device as
//! [`HubSignal`]s; status changes are broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info_span, Instrument};

use vs_core::ports::{
    RelayConnectionPort, RelayConnectorPort, RelayEnvelope, RelayEvent, RelayEventSender,
};
use vs_core::{DeviceId, NegotiationStatus, RelayConfig, RelayId, SignalMessage, SyncEvent};

use crate::events::EventBroadcaster;

/// Live relay connection plus the channels bound on it.
pub struct NegotiationChannel {
    relay: RelayConfig,
    status: NegotiationStatus,
    connection: Arc<dyn RelayConnectionPort>,
    /// channel name -> device negotiating on it
    bindings: HashMap<String, DeviceId>,
}

impl NegotiationChannel {
    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    pub fn status(&self) -> NegotiationStatus {
        self.status
    }

    pub fn bound_channels(&self) -> impl Iterator<Item = (&str, &DeviceId)> {
        self.bindings.iter().map(|(name, device)| (name.as_str(), device))
    }
}

/// What a relay event means for the peer connection of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubSignal {
    /// The remote device joined the channel; the local side initiates.
    MemberJoined { device_id: DeviceId },
    /// A session-establishment message from the remote device.
    Signal {
        device_id: DeviceId,
        message: SignalMessage,
    },
    /// The relay refused the channel.
    Rejected { device_id: DeviceId, reason: String },
}

pub struct NegotiationHub {
    connector: Arc<dyn RelayConnectorPort>,
    events: RelayEventSender,
    broadcaster: EventBroadcaster,
    member_id: DeviceId,
    relays: HashMap<RelayId, NegotiationChannel>,
}

impl NegotiationHub {
    pub fn new(
        connector: Arc<dyn RelayConnectorPort>,
        events: RelayEventSender,
        broadcaster: EventBroadcaster,
        member_id: DeviceId,
    ) -> Self {
        Self {
            connector,
            events,
            broadcaster,
            member_id,
            relays: HashMap::new(),
        }
    }

    pub fn status(&self, relay_id: &RelayId) -> Option<NegotiationStatus> {
        self.relays.get(relay_id).map(|channel| channel.status)
    }

    pub fn channel(&self, relay_id: &RelayId) -> Option<&NegotiationChannel> {
        self.relays.get(relay_id)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Device bound to `channel` on `relay_id`.
    pub fn route(&self, relay_id: &RelayId, channel: &str) -> Option<&DeviceId> {
        self.relays.get(relay_id)?.bindings.get(channel)
    }

    /// Ensure a live connection to `relay` exists. A live connection is
    /// reused; a dead one is replaced.
    pub async fn connect(&mut self, relay: &RelayConfig) -> Result<()> {
        if let Some(existing) = self.relays.get(&relay.id) {
            if existing.status.is_live() {
                tracing::debug!(
                    relay_id = %relay.id,
                    status = ?existing.status,
                    "reusing negotiation channel"
                );
                return Ok(());
            }
        }

        let span = info_span!("negotiation.connect", relay_id = %relay.id, host = %relay.host);
        async {
            // A dead connection keeps its channel bindings; they are re-subscribed below.
            let stale = self.relays.remove(&relay.id);
            if let Some(stale) = &stale {
                if let Err(err) = stale.connection.disconnect().await {
                    tracing::debug!(error = %err, "stale relay connection did not close cleanly");
                }
            }

            self.set_status(&relay.id, NegotiationStatus::Connecting);
            let connection = match self
                .connector
                .connect(relay, self.member_id.as_str(), self.events.clone())
                .await
            {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::warn!(error = %err, "relay unreachable");
                    self.set_status(&relay.id, NegotiationStatus::Unavailable);
                    return Err(err.context(format!("failed to connect to relay {}", relay.id)));
                }
            };

            let bindings = stale.map(|stale| stale.bindings).unwrap_or_default();
            for name in bindings.keys() {
                if let Err(err) = connection.subscribe(name).await {
                    tracing::warn!(channel = %name, error = %err, "re-subscribe failed");
                    if let Err(close_err) = connection.disconnect().await {
                        tracing::debug!(
                            error = %close_err,
                            "relay connection did not close cleanly"
                        );
                    }
                    self.set_status(&relay.id, NegotiationStatus::Failed);
                    return Err(err.context(format!("failed to re-subscribe to {name}")));
                }
            }

            self.relays.insert(
                relay.id.clone(),
                NegotiationChannel {
                    relay: relay.clone(),
                    status: NegotiationStatus::Connecting,
                    connection,
                    bindings,
                },
            );
            tracing::info!("negotiation channel created");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Bind `channel` to `device_id`. Subscribing to an already bound
    /// channel unsubscribes first so the relay never holds two subscriptions.
    pub async fn subscribe(
        &mut self,
        relay_id: &RelayId,
        channel: &str,
        device_id: &DeviceId,
    ) -> Result<()> {
        let negotiation = self
            .relays
            .get_mut(relay_id)
            .ok_or_else(|| anyhow!("no negotiation channel for relay {relay_id}"))?;

        if negotiation.bindings.remove(channel).is_some() {
            tracing::debug!(%channel, "channel already bound, re-subscribing");
            negotiation
                .connection
                .unsubscribe(channel)
                .await
                .with_context(|| format!("failed to unsubscribe from {channel}"))?;
        }

        negotiation
            .connection
            .subscribe(channel)
            .await
            .with_context(|| format!("failed to subscribe to {channel}"))?;
        negotiation.bindings.insert(channel.to_string(), device_id.clone());
        tracing::debug!(%relay_id, %channel, %device_id, "channel bound");
        Ok(())
    }

    /// Release `channel`. Unknown relays and channels are ignored.
    pub async fn unsubscribe(&mut self, relay_id: &RelayId, channel: &str) -> Result<()> {
        let Some(negotiation) = self.relays.get_mut(relay_id) else {
            return Ok(());
        };
        if negotiation.bindings.remove(channel).is_none() {
            return Ok(());
        }
        negotiation
            .connection
            .unsubscribe(channel)
            .await
            .with_context(|| format!("failed to unsubscribe from {channel}"))
    }

    pub async fn publish(
        &self,
        relay_id: &RelayId,
        channel: &str,
        message: &SignalMessage,
    ) -> Result<()> {
        let negotiation = self
            .relays
            .get(relay_id)
            .ok_or_else(|| anyhow!("no negotiation channel for relay {relay_id}"))?;
        tracing::trace!(%relay_id, %channel, kind = message.kind(), "publishing signal");
        negotiation.connection.publish(channel, message).await
    }

    /// Disconnect and forget the relay. Idempotent.
    pub async fn teardown(&mut self, relay_id: &RelayId) {
        let Some(negotiation) = self.relays.remove(relay_id) else {
            return;
        };
        if let Err(err) = negotiation.connection.disconnect().await {
            tracing::warn!(%relay_id, error = %err, "relay did not disconnect cleanly");
        }
        tracing::info!(%relay_id, "negotiation channel torn down");
        self.broadcaster.publish(SyncEvent::NegotiationStatusChanged {
            relay_id: relay_id.clone(),
            status: NegotiationStatus::Disconnected,
        });
    }

    /// Tear down every relay.
    pub async fn teardown_all(&mut self) {
        let ids: Vec<RelayId> = self.relays.keys().cloned().collect();
        for relay_id in ids {
            self.teardown(&relay_id).await;
        }
    }

    /// Relay id whose connection is no longer needed once a device leaves.
    /// `fresh_dependents` counts the other devices on the relay that still
    /// negotiate (transport new or connecting).
    pub fn should_evict(&self, relay_id: &RelayId, fresh_dependents: usize) -> bool {
        self.relays.contains_key(relay_id) && fresh_dependents == 0
    }

    fn set_status(&mut self, relay_id: &RelayId, status: NegotiationStatus) {
        if let Some(negotiation) = self.relays.get_mut(relay_id) {
            if negotiation.status == status {
                return;
            }
            negotiation.status = status;
        }
        tracing::debug!(%relay_id, ?status, "negotiation status changed");
        self.broadcaster.publish(SyncEvent::NegotiationStatusChanged {
            relay_id: relay_id.clone(),
            status,
        });
    }

    /// Translate one relay event. Events from relays that are no longer held
    /// and signals the local device sent itself are dropped.
    pub fn handle_event(&mut self, envelope: RelayEnvelope) -> Option<HubSignal> {
        let RelayEnvelope { relay_id, event } = envelope;
        if !self.relays.contains_key(&relay_id) {
            tracing::debug!(%relay_id, "event from released relay dropped");
            return None;
        }

        match event {
            RelayEvent::StatusChanged(status) => {
                self.set_status(&relay_id, status);
                None
            }
            RelayEvent::SubscriptionSucceeded { channel } => {
                tracing::debug!(%relay_id, %channel, "subscription confirmed");
                None
            }
            RelayEvent::SubscriptionFailed { channel, reason } => {
                tracing::warn!(%relay_id, %channel, %reason, "subscription rejected");
                let device_id = self.route(&relay_id, &channel).cloned();
                if let Some(negotiation) = self.relays.get_mut(&relay_id) {
                    negotiation.bindings.remove(&channel);
                }
                self.set_status(&relay_id, NegotiationStatus::Failed);
                device_id.map(|device_id| HubSignal::Rejected { device_id, reason })
            }
            RelayEvent::MemberAdded { channel, member_id } => {
                let device_id = self.route(&relay_id, &channel)?.clone();
                if device_id.as_str() != member_id {
                    tracing::debug!(%channel, %member_id, "foreign member ignored");
                    return None;
                }
                Some(HubSignal::MemberJoined { device_id })
            }
            RelayEvent::Message { channel, message } => {
                if *message.sender() == self.member_id {
                    return None;
                }
                let Some(device_id) = self.route(&relay_id, &channel).cloned() else {
                    tracing::debug!(
                        %channel,
                        kind = message.kind(),
                        "signal on unbound channel dropped"
                    );
                    return None;
                };
                if *message.sender() != device_id {
                    tracing::warn!(
                        %channel,
                        sender = %message.sender(),
                        "signal from unexpected sender dropped"
                    );
                    return None;
                }
                Some(HubSignal::Signal { device_id, message })
            }
        }
    }
}
