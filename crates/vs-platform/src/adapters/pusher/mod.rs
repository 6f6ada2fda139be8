mod connection;
mod protocol;

pub use connection::PusherRelayConnector;
pub use protocol::{InboundFrame, PusherError};
