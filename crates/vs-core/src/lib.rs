//! # vs-core
//!
//! Core domain models and protocol logic for vaultsync.
//!
//! This crate contains pure business logic without any infrastructure dependencies:
//! identifiers, the device model, relay/traversal configuration, negotiation
//! messages, the reconciliation message model with its wire codec, the pure
//! reconciliation planner, broadcast events, and the ports implemented by
//! the outer layers.

pub mod config;
pub mod device;
pub mod events;
pub mod ids;
pub mod network;
pub mod ports;
pub mod reconciliation;

// Re-export commonly used types at the crate root
pub use config::{IceServer, RelayConfig, SyncConfig};
pub use device::{Device, LocalReplica};
pub use events::{ReconcileOutcome, SyncEvent};
pub use ids::{DeviceId, MessageId, RelayId, SubscriptionId};
pub use network::{NegotiationStatus, RawTransportState, SignalMessage, TransportStatus};
pub use reconciliation::{Credential, Diff, Digest, ReconciliationMessage};
