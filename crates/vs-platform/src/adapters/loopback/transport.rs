//! In-process peer transport.
//!
//! Each transport is an endpoint on a shared [`LoopbackNetwork`]. Session
//! descriptions carry the endpoint token, which is how an answer finds its
//! offer. A pair connects once both sides hold a remote description and have
//! exchanged at least one candidate; messages are then delivered reliably and
//! in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use vs_core::network::{IceCandidate, SdpKind, SessionDescription};
use vs_core::ports::{
    ChannelOrigin, DataChannelPort, PeerEnvelope, PeerEvent, PeerEventSender,
    PeerTransportFactoryPort,
    PeerTransportPort,
};
use vs_core::{DeviceId, IceServer, RawTransportState};

const SDP_PREFIX: &str = "loopback ";

struct Endpoint {
    /// Device id the owning runtime knows the remote side by.
    key: DeviceId,
    events: PeerEventSender,
    partner: Option<u64>,
    remote_description: bool,
    local_candidates: usize,
    remote_candidates: usize,
    /// Label of the channel this side created, if it is the offerer.
    channel_label: Option<String>,
    connected: bool,
    channel_closed: bool,
    closed: bool,
}

impl Endpoint {
    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(PeerEnvelope {
            device_id: self.key.clone(),
            event,
        });
    }

    fn ready(&self) -> bool {
        !self.closed
            && self.remote_description
            && self.local_candidates > 0
            && self.remote_candidates > 0
    }
}

#[derive(Default)]
struct NetworkState {
    next_token: u64,
    endpoints: HashMap<u64, Endpoint>,
}

fn flip(origin: ChannelOrigin) -> ChannelOrigin {
    match origin {
        ChannelOrigin::Local => ChannelOrigin::Inbound,
        ChannelOrigin::Inbound => ChannelOrigin::Local,
    }
}

fn parse_token(description: &SessionDescription) -> Result<u64> {
    description
        .sdp
        .strip_prefix(SDP_PREFIX)
        .ok_or_else(|| anyhow!("not a loopback session description"))?
        .trim()
        .parse()
        .context("malformed loopback token")
}

/// Shared medium for loopback transports. Clones share the medium.
#[derive(Clone)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
    candidates: usize,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::with_candidates(1)
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every endpoint gathers `candidates` synthetic candidates. With zero,
    /// no pair ever connects.
    pub fn with_candidates(candidates: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState::default())),
            candidates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of endpoint pairs that reached the connected state.
    pub fn connected_pairs(&self) -> usize {
        self.lock()
            .endpoints
            .values()
            .filter(|endpoint| endpoint.connected)
            .count()
            / 2
    }

    fn gather(&self, state: &mut NetworkState, token: u64) -> Result<()> {
        let endpoint = state
            .endpoints
            .get_mut(&token)
            .ok_or_else(|| anyhow!("loopback endpoint {token} is gone"))?;
        for index in 0..self.candidates {
            endpoint.emit(PeerEvent::LocalCandidate(IceCandidate {
                candidate: format!(
                    "candidate:{index} 1 udp 2130706431 127.0.0.1 {} typ host",
                    40000 + token * 16 + index as u64
                ),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            }));
        }
        endpoint.local_candidates = self.candidates;
        endpoint.emit(PeerEvent::CandidatesExhausted);
        Ok(())
    }

    fn try_connect(&self, state: &mut NetworkState, token: u64) {
        let Some(partner) = state.endpoints.get(&token).and_then(|endpoint| endpoint.partner) else {
            return;
        };
        let (Some(a), Some(b)) = (state.endpoints.get(&token), state.endpoints.get(&partner)) else {
            return;
        };
        if a.connected || !a.ready() || !b.ready() {
            return;
        }

        let (offerer, answerer, label) = match (&a.channel_label, &b.channel_label) {
            (Some(label), _) => (token, partner, label.clone()),
            (None, Some(label)) => (partner, token, label.clone()),
            (None, None) => (token, partner, String::new()),
        };

        for side in [offerer, answerer] {
            if let Some(endpoint) = state.endpoints.get_mut(&side) {
                endpoint.connected = true;
                endpoint.emit(PeerEvent::StateChanged(RawTransportState::Connected));
            }
        }
        if label.is_empty() {
            return;
        }

        if let Some(endpoint) = state.endpoints.get(&answerer) {
            endpoint.emit(PeerEvent::InboundChannel(Arc::new(LoopbackChannel {
                network: self.clone(),
                owner: answerer,
                origin: ChannelOrigin::Inbound,
                label,
            })));
            endpoint.emit(PeerEvent::ChannelOpened(ChannelOrigin::Inbound));
        }
        if let Some(endpoint) = state.endpoints.get(&offerer) {
            endpoint.emit(PeerEvent::ChannelOpened(ChannelOrigin::Local));
        }
    }

    fn send(&self, owner: u64, origin: ChannelOrigin, data: Vec<u8>) -> Result<()> {
        let state = self.lock();
        let endpoint = state
            .endpoints
            .get(&owner)
            .filter(|endpoint| endpoint.connected && !endpoint.closed && !endpoint.channel_closed)
            .ok_or_else(|| anyhow!("loopback channel is closed"))?;
        let partner = endpoint
            .partner
            .and_then(|partner| state.endpoints.get(&partner))
            .filter(|partner| !partner.closed)
            .ok_or_else(|| anyhow!("loopback peer is gone"))?;

        partner.emit(PeerEvent::ChannelMessage {
            origin: flip(origin),
            data,
        });
        Ok(())
    }

    fn close_channel(&self, state: &mut NetworkState, owner: u64, origin: ChannelOrigin) {
        let partner = match state.endpoints.get_mut(&owner) {
            Some(endpoint) if !endpoint.channel_closed && endpoint.connected => {
                endpoint.channel_closed = true;
                endpoint.emit(PeerEvent::ChannelClosed(origin));
                endpoint.partner
            }
            _ => return,
        };
        if let Some(endpoint) = partner.and_then(|partner| state.endpoints.get_mut(&partner)) {
            endpoint.channel_closed = true;
            endpoint.emit(PeerEvent::ChannelClosed(flip(origin)));
        }
    }
}

#[async_trait]
impl PeerTransportFactoryPort for LoopbackNetwork {
    async fn create(
        &self,
        device_id: &DeviceId,
        _ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransportPort>> {
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.endpoints.insert(
            token,
            Endpoint {
                key: device_id.clone(),
                events,
                partner: None,
                remote_description: false,
                local_candidates: 0,
                remote_candidates: 0,
                channel_label: None,
                connected: false,
                channel_closed: false,
                closed: false,
            },
        );
        tracing::debug!(%device_id, token, "loopback transport created");

        Ok(Arc::new(LoopbackTransport {
            network: self.clone(),
            token,
        }))
    }
}

struct LoopbackTransport {
    network: LoopbackNetwork,
    token: u64,
}

impl LoopbackTransport {
    fn description(&self, kind: SdpKind) -> SessionDescription {
        SessionDescription {
            kind,
            sdp: format!("{SDP_PREFIX}{}", self.token),
        }
    }
}

#[async_trait]
impl PeerTransportPort for LoopbackTransport {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelPort>> {
        let mut state = self.network.lock();
        let endpoint = state
            .endpoints
            .get_mut(&self.token)
            .ok_or_else(|| anyhow!("loopback endpoint {} is gone", self.token))?;
        endpoint.channel_label = Some(label.to_string());

        Ok(Arc::new(LoopbackChannel {
            network: self.network.clone(),
            owner: self.token,
            origin: ChannelOrigin::Local,
            label: label.to_string(),
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.network.lock();
        self.network.gather(&mut state, self.token)?;
        Ok(self.description(SdpKind::Offer))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let offerer = parse_token(&offer)?;
        let mut state = self.network.lock();
        match state.endpoints.get_mut(&offerer) {
            Some(endpoint) if !endpoint.closed && endpoint.partner.is_none() => {
                endpoint.partner = Some(self.token);
            }
            _ => return Err(anyhow!("offer {offerer} is no longer pending")),
        }

        let endpoint = state
            .endpoints
            .get_mut(&self.token)
            .ok_or_else(|| anyhow!("loopback endpoint {} is gone", self.token))?;
        endpoint.partner = Some(offerer);
        endpoint.remote_description = true;
        endpoint.emit(PeerEvent::StateChanged(RawTransportState::Connecting));
        self.network.gather(&mut state, self.token)?;
        self.network.try_connect(&mut state, self.token);
        Ok(self.description(SdpKind::Answer))
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        let answerer = parse_token(&answer)?;
        let mut state = self.network.lock();
        let endpoint = state
            .endpoints
            .get_mut(&self.token)
            .ok_or_else(|| anyhow!("loopback endpoint {} is gone", self.token))?;
        if endpoint.partner != Some(answerer) {
            return Err(anyhow!("answer {answerer} does not match the pending offer"));
        }
        endpoint.remote_description = true;
        endpoint.emit(PeerEvent::StateChanged(RawTransportState::Connecting));
        self.network.try_connect(&mut state, self.token);
        Ok(())
    }

    async fn add_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        let mut state = self.network.lock();
        let endpoint = state
            .endpoints
            .get_mut(&self.token)
            .ok_or_else(|| anyhow!("loopback endpoint {} is gone", self.token))?;
        endpoint.remote_candidates += 1;
        self.network.try_connect(&mut state, self.token);
        Ok(())
    }

    async fn end_of_candidates(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.network.lock();
        let origin = match state.endpoints.get(&self.token) {
            Some(endpoint) if endpoint.closed => return Ok(()),
            Some(endpoint) if endpoint.channel_label.is_some() => ChannelOrigin::Local,
            Some(_) => ChannelOrigin::Inbound,
            None => return Ok(()),
        };
        self.network.close_channel(&mut state, self.token, origin);

        let partner = match state.endpoints.get_mut(&self.token) {
            Some(endpoint) => {
                endpoint.closed = true;
                endpoint.emit(PeerEvent::StateChanged(RawTransportState::Closed));
                endpoint.partner.filter(|_| endpoint.connected)
            }
            None => None,
        };
        if let Some(endpoint) = partner.and_then(|partner| state.endpoints.get(&partner)) {
            endpoint.emit(PeerEvent::StateChanged(RawTransportState::Disconnected));
        }
        Ok(())
    }
}

struct LoopbackChannel {
    network: LoopbackNetwork,
    owner: u64,
    origin: ChannelOrigin,
    label: String,
}

#[async_trait]
impl DataChannelPort for LoopbackChannel {
    fn origin(&self) -> ChannelOrigin {
        self.origin
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.network.send(self.owner, self.origin, data)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.network.lock();
        self.network.close_channel(&mut state, self.owner, self.origin);
        Ok(())
    }
}
