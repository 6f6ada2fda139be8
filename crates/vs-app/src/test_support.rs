//! In-memory port fakes shared by the unit tests of this crate.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use vs_core::network::{IceCandidate, SdpKind, SessionDescription};
use vs_core::ports::{
    ChannelOrigin, DataChannelPort, DeviceRegistryPort, PeerEnvelope, PeerEvent, PeerEventSender,
    PeerTransportFactoryPort, PeerTransportPort, RelayConnectionPort, RelayConnectorPort,
    RelayEventSender, VaultError,
};
use vs_core::{Device, DeviceId, IceServer, LocalReplica, RelayConfig, SignalMessage};

pub fn peer_event(device: &str, event: PeerEvent) -> PeerEnvelope {
    PeerEnvelope {
        device_id: device.into(),
        event,
    }
}

pub fn channel_event(device: &str, origin: ChannelOrigin, data: &[u8]) -> PeerEnvelope {
    peer_event(
        device,
        PeerEvent::ChannelMessage {
            origin,
            data: data.to_vec(),
        },
    )
}

#[derive(Default)]
struct RelayLog {
    calls: Vec<String>,
    published: Vec<SignalMessage>,
}

/// Relay that accepts everything and records what it was asked to do.
#[derive(Default)]
pub struct FakeRelay {
    log: Arc<Mutex<RelayLog>>,
}

impl FakeRelay {
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn published_kinds(&self) -> Vec<&'static str> {
        self.log
            .lock()
            .unwrap()
            .published
            .iter()
            .map(SignalMessage::kind)
            .collect()
    }
}

#[async_trait]
impl RelayConnectorPort for FakeRelay {
    async fn connect(
        &self,
        relay: &RelayConfig,
        _member_id: &str,
        _events: RelayEventSender,
    ) -> Result<Arc<dyn RelayConnectionPort>> {
        self.log.lock().unwrap().calls.push(format!("connect {}", relay.id));
        Ok(Arc::new(FakeRelayConnection {
            log: self.log.clone(),
        }))
    }
}

struct FakeRelayConnection {
    log: Arc<Mutex<RelayLog>>,
}

#[async_trait]
impl RelayConnectionPort for FakeRelayConnection {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.log.lock().unwrap().calls.push(format!("subscribe {channel}"));
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.log.lock().unwrap().calls.push(format!("unsubscribe {channel}"));
        Ok(())
    }

    async fn publish(&self, _channel: &str, message: &SignalMessage) -> Result<()> {
        self.log.lock().unwrap().published.push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.log.lock().unwrap().calls.push("disconnect".to_string());
        Ok(())
    }
}

/// Data channel that keeps every frame it is asked to send.
pub struct FakeChannel {
    origin: ChannelOrigin,
    label: String,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl FakeChannel {
    pub fn new(origin: ChannelOrigin, label: &str) -> Arc<Self> {
        Arc::new(Self {
            origin,
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannelPort for FakeChannel {
    fn origin(&self) -> ChannelOrigin {
        self.origin
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.sent.lock().unwrap().push(data);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inbound_channel(&self) -> Arc<dyn DataChannelPort> {
        FakeChannel::new(ChannelOrigin::Inbound, "vault-sync")
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PeerTransportPort for FakeTransport {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelPort>> {
        self.record(format!("create_data_channel {label}"));
        Ok(FakeChannel::new(ChannelOrigin::Local, label))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: "offer".to_string(),
        })
    }

    async fn accept_offer(&self, _offer: SessionDescription) -> Result<SessionDescription> {
        self.record("accept_offer");
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: "answer".to_string(),
        })
    }

    async fn accept_answer(&self, _answer: SessionDescription) -> Result<()> {
        self.record("accept_answer");
        Ok(())
    }

    async fn add_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        self.record("add_candidate");
        Ok(())
    }

    async fn end_of_candidates(&self) -> Result<()> {
        self.record("end_of_candidates");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    transports: Mutex<Vec<(DeviceId, Arc<FakeTransport>)>>,
}

impl FakeTransportFactory {
    pub fn created(&self) -> Vec<DeviceId> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Most recently created transport for `device_id`.
    pub fn transport(&self, device_id: &DeviceId) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == device_id)
            .map(|(_, transport)| transport.clone())
    }
}

#[async_trait]
impl PeerTransportFactoryPort for FakeTransportFactory {
    async fn create(
        &self,
        device_id: &DeviceId,
        _ice_servers: &[IceServer],
        _events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransportPort>> {
        let transport = Arc::new(FakeTransport::default());
        self.transports
            .lock()
            .unwrap()
            .push((device_id.clone(), transport.clone()));
        Ok(transport)
    }
}

pub struct StaticRegistry {
    local: LocalReplica,
    devices: Vec<Device>,
}

impl StaticRegistry {
    pub fn new(local_id: &str, created_at: i64, devices: Vec<Device>) -> Self {
        Self {
            local: LocalReplica::new(local_id, created_at),
            devices,
        }
    }
}

#[async_trait]
impl DeviceRegistryPort for StaticRegistry {
    fn local_replica(&self) -> LocalReplica {
        self.local.clone()
    }

    async fn linked_devices(&self) -> Result<Vec<Device>, VaultError> {
        Ok(self.devices.clone())
    }
}
