//! Peer connection manager
//!
//! Owns one [`PeerConnectionRecord`] per device and drives it from relay
//! signals and transport events.
//!
//! ```text
//! connect_device ─→ relay connect ─→ transport created ─→ channel subscribed
//!                                                             │
//!                      MemberJoined (remote arrived) ─→ data channel + offer
//!                      Offer ─→ answer        Answer / Candidate ─→ transport
//!                                                             │
//!                      Connected ─→ channel released ─→ ChannelReady
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info_span, Instrument};

use vs_core::network::channel_name;
use vs_core::ports::{
    ChannelOrigin, DataChannelPort, DeviceRegistryPort, PeerEnvelope, PeerEvent, PeerEventSender,
    PeerTransportFactoryPort, RelayEnvelope,
};
use vs_core::{
    DeviceId, RawTransportState, RelayId, SignalMessage, SyncConfig, SyncEvent, TransportStatus,
};

use super::error::ConnectError;
use super::record::PeerConnectionRecord;
use crate::events::EventBroadcaster;
use crate::usecases::negotiation::{HubSignal, NegotiationHub};

/// What a transport event means for the layers above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    /// Transport connected and the authoritative channel is open.
    ChannelReady { device_id: DeviceId, initiator: bool },
    /// A frame arrived on the authoritative channel.
    Message { device_id: DeviceId, data: Vec<u8> },
}

pub struct PeerConnectionManager {
    config: Arc<SyncConfig>,
    registry: Arc<dyn DeviceRegistryPort>,
    factory: Arc<dyn PeerTransportFactoryPort>,
    hub: NegotiationHub,
    peer_events: PeerEventSender,
    broadcaster: EventBroadcaster,
    peers: HashMap<DeviceId, PeerConnectionRecord>,
}

impl PeerConnectionManager {
    pub fn new(
        config: Arc<SyncConfig>,
        registry: Arc<dyn DeviceRegistryPort>,
        factory: Arc<dyn PeerTransportFactoryPort>,
        hub: NegotiationHub,
        peer_events: PeerEventSender,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            config,
            registry,
            factory,
            hub,
            peer_events,
            broadcaster,
            peers: HashMap::new(),
        }
    }

    pub fn hub(&self) -> &NegotiationHub {
        &self.hub
    }

    pub fn record(&self, device_id: &DeviceId) -> Option<&PeerConnectionRecord> {
        self.peers.get(device_id)
    }

    pub fn status(&self, device_id: &DeviceId) -> Option<TransportStatus> {
        self.peers.get(device_id).map(PeerConnectionRecord::status)
    }

    pub fn data_channel(&self, device_id: &DeviceId) -> Option<Arc<dyn DataChannelPort>> {
        self.peers.get(device_id)?.data_channel()
    }

    pub fn devices(&self) -> impl Iterator<Item = (&DeviceId, TransportStatus)> {
        self.peers.iter().map(|(id, record)| (id, record.status))
    }

    /// Start negotiating with a linked device.
    ///
    /// Refused while a record for the device is still new, connecting or
    /// connected. A terminal record is replaced.
    pub async fn connect_device(&mut self, device_id: &DeviceId) -> Result<(), ConnectError> {
        let span = info_span!("connection.connect", device_id = %device_id);
        async {
            if let Some(existing) = self.peers.get(device_id) {
                if !existing.status.is_terminal() {
                    return Err(ConnectError::AlreadyActive {
                        device_id: device_id.clone(),
                        status: existing.status,
                    });
                }
            }

            let device = self
                .registry
                .find_device(device_id)
                .await?
                .ok_or_else(|| ConnectError::UnknownDevice(device_id.clone()))?;

            let Some(relay) = self.config.resolve_relay(device.relay_id.as_ref()).cloned() else {
                return Err(ConnectError::UnknownRelay {
                    device_id: device_id.clone(),
                    relay_id: device
                        .relay_id
                        .clone()
                        .unwrap_or_else(|| self.config.default_relay.id.clone()),
                });
            };

            if let Some(stale) = self.peers.remove(device_id) {
                tracing::debug!(status = ?stale.status, "replacing terminal connection record");
                close_record(&stale).await;
            }

            self.hub
                .connect(&relay)
                .await
                .map_err(ConnectError::Negotiation)?;

            let local = self.registry.local_replica();
            let (channel, role) = channel_name(&relay.channel_namespace, &local, &device);
            let ice_servers = self.config.resolve_ice_servers(&device.ice_server_ids);

            let transport = self
                .factory
                .create(device_id, &ice_servers, self.peer_events.clone())
                .await
                .map_err(ConnectError::Transport)?;

            // Registered before subscribing so inbound signals always find it.
            self.peers.insert(
                device_id.clone(),
                PeerConnectionRecord::new(
                    device,
                    relay.id.clone(),
                    channel.clone(),
                    role,
                    transport,
                ),
            );

            if let Err(err) = self.hub.subscribe(&relay.id, &channel, device_id).await {
                if let Some(record) = self.peers.remove(device_id) {
                    close_record(&record).await;
                }
                return Err(ConnectError::Negotiation(err));
            }
            if let Some(record) = self.peers.get_mut(device_id) {
                record.negotiating = true;
            }

            tracing::info!(%channel, ?role, "negotiation started");
            self.broadcaster.publish(SyncEvent::TransportStatusChanged {
                device_id: device_id.clone(),
                status: TransportStatus::New,
            });
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Close and forget the connection to a device. The relay is released
    /// when no other device still negotiates through it.
    pub async fn disconnect_device(&mut self, device_id: &DeviceId) -> bool {
        let Some(record) = self.peers.remove(device_id) else {
            return false;
        };

        let span = info_span!("connection.disconnect", device_id = %device_id);
        async {
            close_record(&record).await;

            if record.negotiating {
                if let Err(err) = self.hub.unsubscribe(&record.relay_id, &record.channel).await {
                    tracing::debug!(error = %err, "negotiation channel release failed");
                }
            }

            if record.status != TransportStatus::Disconnected {
                self.broadcaster.publish(SyncEvent::TransportStatusChanged {
                    device_id: device_id.clone(),
                    status: TransportStatus::Disconnected,
                });
            }

            let fresh = self.fresh_dependents(&record.relay_id);
            if self.hub.should_evict(&record.relay_id, fresh) {
                self.hub.teardown(&record.relay_id).await;
            } else {
                tracing::debug!(relay_id = %record.relay_id, fresh, "relay kept for other devices");
            }
            true
        }
        .instrument(span)
        .await
    }

    pub async fn disconnect_all(&mut self) {
        let ids: Vec<DeviceId> = self.peers.keys().cloned().collect();
        for device_id in ids {
            self.disconnect_device(&device_id).await;
        }
        self.hub.teardown_all().await;
    }

    /// Devices on `relay_id` whose transport may still need negotiation.
    fn fresh_dependents(&self, relay_id: &RelayId) -> usize {
        self.peers
            .values()
            .filter(|record| record.relay_id == *relay_id && record.status.is_fresh())
            .count()
    }

    fn set_status(&mut self, device_id: &DeviceId, status: TransportStatus) -> bool {
        let Some(record) = self.peers.get_mut(device_id) else {
            return false;
        };
        if record.status == status {
            return false;
        }
        // Only a new connect_device replaces a terminal record.
        if record.status.is_terminal() {
            tracing::debug!(
                %device_id,
                from = ?record.status,
                to = ?status,
                "late transport state ignored"
            );
            return false;
        }
        tracing::info!(%device_id, from = ?record.status, to = ?status, "transport status changed");
        record.status = status;
        if status.is_terminal() {
            record.channel_open = false;
        }
        self.broadcaster.publish(SyncEvent::TransportStatusChanged {
            device_id: device_id.clone(),
            status,
        });
        true
    }

    async fn fail(&mut self, device_id: &DeviceId, message: String) {
        tracing::warn!(%device_id, %message, "peer connection failed");
        self.set_status(device_id, TransportStatus::Failed);
        self.broadcaster.publish(SyncEvent::Warning {
            device_id: device_id.clone(),
            message,
        });
    }

    pub async fn handle_relay_event(&mut self, envelope: RelayEnvelope) {
        if let Some(signal) = self.hub.handle_event(envelope) {
            self.handle_hub_signal(signal).await;
        }
    }

    async fn handle_hub_signal(&mut self, signal: HubSignal) {
        match signal {
            HubSignal::MemberJoined { device_id } => self.initiate(&device_id).await,
            HubSignal::Signal { device_id, message } => {
                let kind = message.kind();
                if let Err(err) = self.apply_signal(&device_id, message).await {
                    self.fail(&device_id, format!("failed to apply {kind}: {err:#}"))
                        .await;
                }
            }
            HubSignal::Rejected { device_id, reason } => {
                if let Some(record) = self.peers.get_mut(&device_id) {
                    record.negotiating = false;
                }
                self.fail(&device_id, format!("negotiation channel rejected: {reason}"))
                    .await;
            }
        }
    }

    /// The remote device arrived on the channel: create the data channel
    /// and the offer.
    async fn initiate(&mut self, device_id: &DeviceId) {
        let Some(record) = self.peers.get_mut(device_id) else {
            return;
        };
        if !record.status.is_fresh() || record.initiator {
            tracing::debug!(%device_id, status = ?record.status, "member join ignored");
            return;
        }
        record.initiator = true;

        let span = info_span!("connection.offer", device_id = %device_id);
        let result: Result<()> = async {
            let record = self
                .peers
                .get_mut(device_id)
                .ok_or_else(|| anyhow::anyhow!("connection record vanished"))?;
            let channel = record
                .transport
                .create_data_channel(&self.config.data_channel_label)
                .await?;
            record.local_channel = Some(channel);

            let description = record.transport.create_offer().await?;
            let offer = SignalMessage::Offer {
                from: self.registry.local_replica().device_id,
                description,
            };
            self.hub.publish(&record.relay_id, &record.channel, &offer).await?;
            tracing::debug!("offer published");
            Ok(())
        }
        .instrument(span)
        .await;

        if let Err(err) = result {
            self.fail(device_id, format!("failed to start negotiation: {err:#}"))
                .await;
        }
    }

    async fn apply_signal(&mut self, device_id: &DeviceId, message: SignalMessage) -> Result<()> {
        let Some(record) = self.peers.get(device_id) else {
            return Ok(());
        };
        let transport = record.transport.clone();
        let relay_id = record.relay_id.clone();
        let channel = record.channel.clone();

        match message {
            SignalMessage::Offer { description, .. } => {
                let answer = transport.accept_offer(description).await?;
                let reply = SignalMessage::Answer {
                    from: self.registry.local_replica().device_id,
                    description: answer,
                };
                self.hub.publish(&relay_id, &channel, &reply).await?;
                tracing::debug!(%device_id, "answer published");
            }
            SignalMessage::Answer { description, .. } => {
                transport.accept_answer(description).await?;
            }
            SignalMessage::Candidate { candidate, .. } => {
                transport.add_candidate(candidate).await?;
            }
            SignalMessage::CandidatesExhausted { .. } => {
                transport.end_of_candidates().await?;
            }
        }
        Ok(())
    }

    /// Apply one transport event. Events of devices without a record are
    /// late callbacks of closed transports and are dropped.
    pub async fn handle_peer_event(&mut self, envelope: PeerEnvelope) -> Option<PeerSignal> {
        let PeerEnvelope { device_id, event } = envelope;
        if !self.peers.contains_key(&device_id) {
            if let PeerEvent::ChannelMessage { data, .. } = &event {
                tracing::error!(%device_id, len = data.len(), "frame for unknown device dropped");
            } else {
                tracing::debug!(%device_id, ?event, "event for unknown device dropped");
            }
            return None;
        }

        match event {
            PeerEvent::StateChanged(raw) => {
                let status = TransportStatus::from(raw);
                self.set_status(&device_id, status);
                if raw == RawTransportState::Connected {
                    self.release_negotiation(&device_id).await;
                }
                self.check_ready(&device_id)
            }
            PeerEvent::LocalCandidate(candidate) => {
                let record = self.peers.get_mut(&device_id)?;
                record.candidates_generated += 1;
                let (relay_id, channel) = (record.relay_id.clone(), record.channel.clone());
                let message = SignalMessage::Candidate {
                    from: self.registry.local_replica().device_id,
                    candidate,
                };
                if let Err(err) = self.hub.publish(&relay_id, &channel, &message).await {
                    tracing::warn!(%device_id, error = %err, "candidate not published");
                }
                None
            }
            PeerEvent::CandidatesExhausted => {
                let record = self.peers.get(&device_id)?;
                if record.candidates_generated == 0 {
                    self.fail(&device_id, "no network candidates were discovered".to_string())
                        .await;
                    return None;
                }
                let (relay_id, channel) = (record.relay_id.clone(), record.channel.clone());
                let message = SignalMessage::CandidatesExhausted {
                    from: self.registry.local_replica().device_id,
                };
                if let Err(err) = self.hub.publish(&relay_id, &channel, &message).await {
                    tracing::warn!(%device_id, error = %err, "end of candidates not published");
                }
                None
            }
            PeerEvent::InboundChannel(channel) => {
                let record = self.peers.get_mut(&device_id)?;
                tracing::debug!(%device_id, label = %channel.label(), "inbound data channel");
                record.inbound_channel = Some(channel);
                record.channel_open = false;
                None
            }
            PeerEvent::ChannelOpened(origin) => {
                let record = self.peers.get_mut(&device_id)?;
                if !record.is_authoritative(origin) {
                    return None;
                }
                record.channel_open = true;
                self.check_ready(&device_id)
            }
            PeerEvent::ChannelClosed(origin) => {
                if self.peers.get(&device_id)?.is_authoritative(origin) {
                    self.set_status(&device_id, TransportStatus::Disconnected);
                }
                None
            }
            PeerEvent::ChannelError { origin, error } => {
                if self.peers.get(&device_id)?.is_authoritative(origin) {
                    self.fail(&device_id, format!("data channel error: {error}")).await;
                }
                None
            }
            PeerEvent::ChannelMessage { origin, data } => {
                if !self.peers.get(&device_id)?.is_authoritative(origin) {
                    tracing::debug!(%device_id, "frame on superseded channel dropped");
                    return None;
                }
                Some(PeerSignal::Message { device_id, data })
            }
        }
    }

    async fn release_negotiation(&mut self, device_id: &DeviceId) {
        let Some(record) = self.peers.get_mut(device_id) else {
            return;
        };
        if !record.negotiating {
            return;
        }
        record.negotiating = false;
        let (relay_id, channel) = (record.relay_id.clone(), record.channel.clone());
        if let Err(err) = self.hub.unsubscribe(&relay_id, &channel).await {
            tracing::debug!(%device_id, error = %err, "negotiation channel release failed");
        }
    }

    fn check_ready(&mut self, device_id: &DeviceId) -> Option<PeerSignal> {
        let record = self.peers.get_mut(device_id)?;
        if record.ready_announced || record.data_channel().is_none() {
            return None;
        }
        record.ready_announced = true;
        Some(PeerSignal::ChannelReady {
            device_id: device_id.clone(),
            initiator: record.initiator,
        })
    }
}

async fn close_record(record: &PeerConnectionRecord) {
    for channel in record.channels() {
        if let Err(err) = channel.close().await {
            tracing::debug!(error = %err, "data channel did not close cleanly");
        }
    }
    if let Err(err) = record.transport.close().await {
        tracing::debug!(error = %err, "transport did not close cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        channel_event, peer_event, FakeRelay, FakeTransportFactory, StaticRegistry,
    };
    use tokio::sync::mpsc;
    use vs_core::network::{IceCandidate, SdpKind, SessionDescription};
    use vs_core::ports::{RelayEnvelope, RelayEvent};
    use vs_core::{Device, NegotiationStatus, RelayConfig};

    struct Fixture {
        manager: PeerConnectionManager,
        relay: Arc<FakeRelay>,
        factory: Arc<FakeTransportFactory>,
        events: mpsc::UnboundedReceiver<SyncEvent>,
    }

    fn fixture(devices: Vec<Device>) -> Fixture {
        let mut config = SyncConfig::default();
        config.relays.push(RelayConfig {
            id: "r2".into(),
            ..RelayConfig::default()
        });
        let registry = Arc::new(StaticRegistry::new("a", 10, devices));
        let relay = Arc::new(FakeRelay::default());
        let factory = Arc::new(FakeTransportFactory::default());
        let broadcaster = EventBroadcaster::new();
        let (_id, events) = broadcaster.subscribe_channel();
        let (relay_tx, _relay_rx) = mpsc::unbounded_channel();
        let (peer_tx, _peer_rx) = mpsc::unbounded_channel();

        let hub = NegotiationHub::new(relay.clone(), relay_tx, broadcaster.clone(), "a".into());
        let manager = PeerConnectionManager::new(
            Arc::new(config),
            registry,
            factory.clone(),
            hub,
            peer_tx,
            broadcaster,
        );
        Fixture {
            manager,
            relay,
            factory,
            events,
        }
    }

    fn device_b() -> Device {
        Device::new("b", "laptop", 20, 20)
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn default_relay() -> vs_core::RelayId {
        "default".into()
    }

    #[tokio::test]
    async fn connect_registers_record_and_subscribes() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();

        let record = f.manager.record(&"b".into()).unwrap();
        assert_eq!(record.status(), TransportStatus::New);
        assert_eq!(record.channel_name(), "presence-vaultsync-a_b");
        assert_eq!(f.relay.calls(), vec!["connect default", "subscribe presence-vaultsync-a_b"]);
        assert_eq!(f.factory.created(), vec![DeviceId::from("b")]);
    }

    #[tokio::test]
    async fn second_connect_is_refused_without_duplicate() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        let err = f.manager.connect_device(&"b".into()).await.unwrap_err();

        assert!(matches!(err, ConnectError::AlreadyActive { status: TransportStatus::New, .. }));
        assert_eq!(f.factory.created().len(), 1);
    }

    #[tokio::test]
    async fn unknown_device_and_relay_are_rejected() {
        let mut f = fixture(vec![Device::new("c", "phone", 5, 5).with_relay("nowhere")]);

        assert!(matches!(
            f.manager.connect_device(&"zz".into()).await,
            Err(ConnectError::UnknownDevice(_))
        ));
        assert!(matches!(
            f.manager.connect_device(&"c".into()).await,
            Err(ConnectError::UnknownRelay { .. })
        ));
        assert!(f.factory.created().is_empty());
    }

    #[tokio::test]
    async fn member_join_creates_channel_and_offer() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();

        f.manager
            .handle_relay_event(RelayEnvelope {
                relay_id: default_relay(),
                event: RelayEvent::MemberAdded {
                    channel: "presence-vaultsync-a_b".into(),
                    member_id: "b".into(),
                },
            })
            .await;

        let transport = f.factory.transport(&"b".into()).unwrap();
        assert_eq!(transport.calls(), vec!["create_data_channel vault-sync", "create_offer"]);
        assert!(f.manager.record(&"b".into()).unwrap().is_initiator());
        assert_eq!(f.relay.published_kinds(), vec!["offer"]);
    }

    #[tokio::test]
    async fn inbound_offer_is_answered() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();

        f.manager
            .handle_relay_event(RelayEnvelope {
                relay_id: default_relay(),
                event: RelayEvent::Message {
                    channel: "presence-vaultsync-a_b".into(),
                    message: SignalMessage::Offer {
                        from: "b".into(),
                        description: SessionDescription {
                            kind: SdpKind::Offer,
                            sdp: "offer".into(),
                        },
                    },
                },
            })
            .await;

        let transport = f.factory.transport(&"b".into()).unwrap();
        assert_eq!(transport.calls(), vec!["accept_offer"]);
        assert_eq!(f.relay.published_kinds(), vec!["answer"]);
    }

    #[tokio::test]
    async fn candidates_are_published_and_counted() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::LocalCandidate(candidate)))
            .await;
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::CandidatesExhausted))
            .await;

        assert_eq!(f.manager.record(&"b".into()).unwrap().candidates_generated(), 1);
        assert_eq!(f.relay.published_kinds(), vec!["candidate", "candidates-exhausted"]);
        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::New));
    }

    #[tokio::test]
    async fn exhausted_without_candidates_fails_the_connection() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        drain(&mut f.events);

        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::CandidatesExhausted))
            .await;

        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::Failed));
        let events = drain(&mut f.events);
        assert!(events.contains(&SyncEvent::TransportStatusChanged {
            device_id: "b".into(),
            status: TransportStatus::Failed,
        }));
        assert!(events.iter().any(|e| matches!(e, SyncEvent::Warning { .. })));
        assert!(f.relay.published_kinds().is_empty());

        // A failed record may be replaced.
        f.manager.connect_device(&"b".into()).await.unwrap();
        assert_eq!(f.factory.created().len(), 2);
    }

    #[tokio::test]
    async fn failed_status_survives_late_transport_states() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::CandidatesExhausted))
            .await;
        drain(&mut f.events);

        for raw in [RawTransportState::Connecting, RawTransportState::Connected] {
            f.manager
                .handle_peer_event(peer_event("b", PeerEvent::StateChanged(raw)))
                .await;
        }

        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::Failed));
        assert!(drain(&mut f.events).is_empty());
        f.manager.connect_device(&"b".into()).await.unwrap();
        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::New));
    }

    #[tokio::test]
    async fn disconnected_record_is_not_revived_by_reconnecting_transport() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        let inbound = f.factory.transport(&"b".into()).unwrap().inbound_channel();
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::InboundChannel(inbound)))
            .await;
        f.manager
            .handle_peer_event(peer_event(
                "b",
                PeerEvent::ChannelOpened(ChannelOrigin::Inbound),
            ))
            .await;
        f.manager
            .handle_peer_event(peer_event(
                "b",
                PeerEvent::StateChanged(RawTransportState::Connected),
            ))
            .await;
        assert!(f.manager.data_channel(&"b".into()).is_some());

        f.manager
            .handle_peer_event(peer_event(
                "b",
                PeerEvent::StateChanged(RawTransportState::Disconnected),
            ))
            .await;
        let ready = f
            .manager
            .handle_peer_event(peer_event(
                "b",
                PeerEvent::StateChanged(RawTransportState::Connected),
            ))
            .await;

        assert_eq!(ready, None);
        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::Disconnected));
        assert!(f.manager.data_channel(&"b".into()).is_none());
        f.manager.connect_device(&"b".into()).await.unwrap();
        assert_eq!(f.factory.created().len(), 2);
    }

    #[tokio::test]
    async fn frame_for_unknown_device_is_dropped() {
        let mut f = fixture(vec![device_b()]);

        let signal = f
            .manager
            .handle_peer_event(channel_event("b", ChannelOrigin::Inbound, b"orphan"))
            .await;

        assert_eq!(signal, None);
        assert!(drain(&mut f.events).is_empty());
    }

    #[tokio::test]
    async fn connected_releases_negotiation_and_announces_ready() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();

        let inbound = f.factory.transport(&"b".into()).unwrap().inbound_channel();
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::InboundChannel(inbound)))
            .await;
        assert_eq!(
            f.manager
                .handle_peer_event(peer_event(
                    "b",
                    PeerEvent::ChannelOpened(ChannelOrigin::Inbound),
                ))
                .await,
            None
        );
        assert!(f.manager.data_channel(&"b".into()).is_none());

        let ready = f
            .manager
            .handle_peer_event(peer_event(
                "b",
                PeerEvent::StateChanged(RawTransportState::Connected),
            ))
            .await;

        assert_eq!(
            ready,
            Some(PeerSignal::ChannelReady {
                device_id: "b".into(),
                initiator: false,
            })
        );
        assert!(f.manager.data_channel(&"b".into()).is_some());
        assert!(f
            .relay
            .calls()
            .contains(&"unsubscribe presence-vaultsync-a_b".to_string()));
    }

    #[tokio::test]
    async fn inbound_channel_supersedes_local_channel() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        let inbound = f.factory.transport(&"b".into()).unwrap().inbound_channel();
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::InboundChannel(inbound)))
            .await;

        let local = f
            .manager
            .handle_peer_event(channel_event("b", ChannelOrigin::Local, b"stale"))
            .await;
        let remote = f
            .manager
            .handle_peer_event(channel_event("b", ChannelOrigin::Inbound, b"fresh"))
            .await;

        assert_eq!(local, None);
        assert_eq!(
            remote,
            Some(PeerSignal::Message {
                device_id: "b".into(),
                data: b"fresh".to_vec(),
            })
        );

        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::ChannelClosed(ChannelOrigin::Local)))
            .await;
        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::New));
    }

    #[tokio::test]
    async fn disconnect_keeps_relay_while_a_sibling_negotiates() {
        let mut f = fixture(vec![device_b(), Device::new("c", "phone", 30, 30)]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        f.manager.connect_device(&"c".into()).await.unwrap();

        assert!(f.manager.disconnect_device(&"b".into()).await);
        assert!(f.manager.hub().status(&default_relay()).is_some());

        assert!(f.manager.disconnect_device(&"c".into()).await);
        assert!(f.manager.hub().status(&default_relay()).is_none());
        assert!(!f.manager.disconnect_device(&"c".into()).await);
        assert_eq!(f.relay.calls().last().map(String::as_str), Some("disconnect"));
    }

    #[tokio::test]
    async fn disconnect_evicts_relay_when_siblings_are_connected() {
        let mut f = fixture(vec![device_b(), Device::new("c", "phone", 30, 30)]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        f.manager.connect_device(&"c".into()).await.unwrap();
        f.manager
            .handle_peer_event(peer_event(
                "c",
                PeerEvent::StateChanged(RawTransportState::Connected),
            ))
            .await;

        f.manager.disconnect_device(&"b".into()).await;

        assert!(f.manager.hub().status(&default_relay()).is_none());
        let events = drain(&mut f.events);
        assert!(events.contains(&SyncEvent::NegotiationStatusChanged {
            relay_id: default_relay(),
            status: NegotiationStatus::Disconnected,
        }));
    }

    #[tokio::test]
    async fn closed_raw_state_maps_to_disconnected() {
        let mut f = fixture(vec![device_b()]);
        f.manager.connect_device(&"b".into()).await.unwrap();
        f.manager
            .handle_peer_event(peer_event("b", PeerEvent::StateChanged(RawTransportState::Closed)))
            .await;

        assert_eq!(f.manager.status(&"b".into()), Some(TransportStatus::Disconnected));
    }
}
