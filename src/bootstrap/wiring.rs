//! Dependency wiring
//!
//! Builds [`SyncDeps`] from a configuration, a vault and a pair of
//! transports, and starts the runtime.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;

use vs_app::{SyncDeps, SyncHandle, SyncRuntime};
use vs_core::ports::{PeerTransportFactoryPort, RelayConnectorPort};
use vs_core::SyncConfig;
use vs_infra::{InMemoryVault, Sha256HashDiff};
use vs_platform::{
    LoopbackNetwork, LoopbackRelayServer, PusherRelayConnector, WebRtcTransportFactory,
};

/// The relay and peer transport a replica talks through.
#[derive(Clone)]
pub struct Transports {
    pub relay: Arc<dyn RelayConnectorPort>,
    pub peer: Arc<dyn PeerTransportFactoryPort>,
}

impl Transports {
    /// Pusher relay and WebRTC peer connections.
    pub fn network() -> Result<Self> {
        Ok(Self {
            relay: Arc::new(PusherRelayConnector::default()),
            peer: Arc::new(WebRtcTransportFactory::new()?),
        })
    }

    /// In-process relay and transport shared by every replica built from
    /// the same `server` and `network`.
    pub fn loopback(server: &LoopbackRelayServer, network: &LoopbackNetwork) -> Self {
        Self {
            relay: Arc::new(server.clone()),
            peer: Arc::new(network.clone()),
        }
    }
}

/// Start a runtime over `vault`, which serves as both the credential store
/// and the device registry.
pub fn spawn_replica(
    config: SyncConfig,
    vault: Arc<InMemoryVault>,
    transports: Transports,
) -> (JoinHandle<()>, SyncHandle) {
    let deps = SyncDeps {
        config,
        registry: vault.clone(),
        vault,
        hash_diff: Arc::new(Sha256HashDiff::new()),
        relay_connector: transports.relay,
        transport_factory: transports.peer,
    };
    SyncRuntime::spawn(deps)
}
