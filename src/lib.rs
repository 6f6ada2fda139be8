//! vaultsync
//!
//! Bootstrap for the peer-to-peer sync core: configuration loading, tracing
//! setup, adapter wiring and an in-process simulator.

pub mod bootstrap;
pub mod simulate;

pub use bootstrap::config::{load_config, AppConfig};
pub use bootstrap::wiring::{spawn_replica, Transports};
