//! vaultsync application orchestration layer
//!
//! This crate drives the synchronization protocol: negotiation over relays,
//! the per-device peer transports, the reconciliation engine, and the event
//! broadcaster, all sequenced by a single runtime loop.

pub mod events;
pub mod runtime;
pub mod usecases;

pub use events::EventBroadcaster;
pub use runtime::{SyncDeps, SyncHandle, SyncRuntime};
pub use usecases::connection::{ConnectError, PeerConnectionManager};
pub use usecases::negotiation::NegotiationHub;
pub use usecases::reconciliation::{PeerSyncState, ReconciliationEngine, SendError};

#[cfg(test)]
mod test_support;
