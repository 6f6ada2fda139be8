mod engine;
mod error;

pub use engine::{PeerSyncState, ReconciliationEngine};
pub use error::SendError;
