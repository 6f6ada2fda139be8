//! Negotiation and transport domain types.

mod channel_name;
mod signal;
mod status;

pub use channel_name::{channel_name, ChannelRole};
pub use signal::{IceCandidate, SdpKind, SessionDescription, SignalMessage};
pub use status::{NegotiationStatus, RawTransportState, TransportStatus};
