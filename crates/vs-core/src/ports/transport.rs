//! Direct peer transport port.
//!
//! One transport per linked device. Implementations push state changes,
//! discovered candidates, inbound channels and data-channel activity as
//! [`PeerEnvelope`]s; the application layer consumes them in order.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::ids::DeviceId;
use crate::network::{IceCandidate, RawTransportState, SessionDescription};

/// Where a data channel object came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrigin {
    /// Created by this side.
    Local,
    /// Announced by the remote side.
    Inbound,
}

pub enum PeerEvent {
    StateChanged(RawTransportState),
    LocalCandidate(IceCandidate),
    /// Candidate discovery finished.
    CandidatesExhausted,
    InboundChannel(Arc<dyn DataChannelPort>),
    ChannelOpened(ChannelOrigin),
    ChannelClosed(ChannelOrigin),
    ChannelError { origin: ChannelOrigin, error: String },
    ChannelMessage { origin: ChannelOrigin, data: Vec<u8> },
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::CandidatesExhausted => f.write_str("CandidatesExhausted"),
            Self::InboundChannel(channel) => f
                .debug_tuple("InboundChannel")
                .field(&channel.label())
                .finish(),
            Self::ChannelOpened(origin) => f.debug_tuple("ChannelOpened").field(origin).finish(),
            Self::ChannelClosed(origin) => f.debug_tuple("ChannelClosed").field(origin).finish(),
            Self::ChannelError { origin, error } => f
                .debug_struct("ChannelError")
                .field("origin", origin)
                .field("error", error)
                .finish(),
            Self::ChannelMessage { origin, data } => f
                .debug_struct("ChannelMessage")
                .field("origin", origin)
                .field("len", &data.len())
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct PeerEnvelope {
    pub device_id: DeviceId,
    pub event: PeerEvent,
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEnvelope>;

#[async_trait]
pub trait PeerTransportFactoryPort: Send + Sync {
    async fn create(
        &self,
        device_id: &DeviceId,
        ice_servers: &[IceServer],
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransportPort>>;
}

#[async_trait]
pub trait PeerTransportPort: Send + Sync {
    /// Create the session's data channel. Only the initiator calls this.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelPort>>;

    /// Create an offer and install it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Install a remote offer and return the local answer.
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// The remote side will not send further candidates.
    async fn end_of_candidates(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait DataChannelPort: Send + Sync {
    fn origin(&self) -> ChannelOrigin;

    fn label(&self) -> String;

    async fn send(&self, data: Vec<u8>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
