use std::sync::Arc;

use vs_core::network::ChannelRole;
use vs_core::ports::{ChannelOrigin, DataChannelPort, PeerTransportPort};
use vs_core::{Device, RelayId, TransportStatus};

/// Everything held about the direct connection to one device.
pub struct PeerConnectionRecord {
    pub(crate) device: Device,
    pub(crate) relay_id: RelayId,
    pub(crate) channel: String,
    pub(crate) role: ChannelRole,
    pub(crate) transport: Arc<dyn PeerTransportPort>,
    pub(crate) status: TransportStatus,
    /// Set once the local side created the offer.
    pub(crate) initiator: bool,
    pub(crate) local_channel: Option<Arc<dyn DataChannelPort>>,
    pub(crate) inbound_channel: Option<Arc<dyn DataChannelPort>>,
    pub(crate) channel_open: bool,
    pub(crate) ready_announced: bool,
    pub(crate) candidates_generated: usize,
    /// Still bound to the negotiation channel.
    pub(crate) negotiating: bool,
}

impl PeerConnectionRecord {
    pub(crate) fn new(
        device: Device,
        relay_id: RelayId,
        channel: String,
        role: ChannelRole,
        transport: Arc<dyn PeerTransportPort>,
    ) -> Self {
        Self {
            device,
            relay_id,
            channel,
            role,
            transport,
            status: TransportStatus::New,
            initiator: false,
            local_channel: None,
            inbound_channel: None,
            channel_open: false,
            ready_announced: false,
            candidates_generated: 0,
            negotiating: false,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn relay_id(&self) -> &RelayId {
        &self.relay_id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn status(&self) -> TransportStatus {
        self.status
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn candidates_generated(&self) -> usize {
        self.candidates_generated
    }

    /// Once the remote side opened a channel, its channel wins over ours.
    pub(crate) fn is_authoritative(&self, origin: ChannelOrigin) -> bool {
        match origin {
            ChannelOrigin::Inbound => true,
            ChannelOrigin::Local => self.inbound_channel.is_none(),
        }
    }

    fn authoritative_channel(&self) -> Option<&Arc<dyn DataChannelPort>> {
        self.inbound_channel.as_ref().or(self.local_channel.as_ref())
    }

    /// The channel usable for sending; only present while connected.
    pub fn data_channel(&self) -> Option<Arc<dyn DataChannelPort>> {
        if self.status != TransportStatus::Connected || !self.channel_open {
            return None;
        }
        self.authoritative_channel().cloned()
    }

    pub(crate) fn channels(&self) -> impl Iterator<Item = &Arc<dyn DataChannelPort>> {
        self.local_channel.iter().chain(self.inbound_channel.iter())
    }
}
