//! Adapters connecting the vaultsync ports to the outside world: a Pusher
//! protocol relay, a WebRTC peer transport, and in-process loopback
//! implementations of both.

pub mod adapters;

pub use adapters::loopback::{LoopbackNetwork, LoopbackRelayServer};
pub use adapters::pusher::PusherRelayConnector;
pub use adapters::webrtc_transport::WebRtcTransportFactory;
