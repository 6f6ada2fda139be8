//! In-process relay and transport.
//!
//! Several runtimes in one process share a [`LoopbackRelayServer`] and a
//! [`LoopbackNetwork`]; every protocol path of the sync core can then run
//! without sockets.

mod relay;
mod transport;

pub use relay::LoopbackRelayServer;
pub use transport::LoopbackNetwork;
