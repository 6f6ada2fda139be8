mod error;
mod manager;
mod record;

pub use error::ConnectError;
pub use manager::{PeerConnectionManager, PeerSignal};
pub use record::PeerConnectionRecord;
