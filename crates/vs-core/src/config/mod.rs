//! Synchronization configuration domain model

mod defaults;
mod model;

pub use defaults::{
    DEFAULT_CHANNEL_NAMESPACE, DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_MAX_MESSAGE_BYTES,
};
pub use model::{IceServer, RelayConfig, SyncConfig};
