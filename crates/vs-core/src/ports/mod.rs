//! Port interfaces for the application layer
//!
//! Ports define the contract between the synchronization logic and the
//! collaborators it consumes: the hash/diff engine, the vault store and
//! device registry, the relay used for negotiation, and the direct peer
//! transport. Implementations live in `vs-infra` and `vs-platform`.

pub mod errors;
mod hash_diff;
mod registry;
mod relay;
mod transport;
mod vault;

pub use errors::{HashDiffError, VaultError};
pub use hash_diff::HashDiffPort;
pub use registry::DeviceRegistryPort;
pub use relay::{
    RelayConnectionPort, RelayConnectorPort, RelayEnvelope, RelayEvent, RelayEventSender,
};
pub use transport::{
    ChannelOrigin, DataChannelPort, PeerEnvelope, PeerEvent, PeerEventSender,
    PeerTransportFactoryPort,
    PeerTransportPort,
};
pub use vault::VaultStatePort;
