use serde::{Deserialize, Serialize};

use crate::ids::RelayId;

/// A relay server offering authenticated pub/sub channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub id: RelayId,
    /// Application key presented when opening the socket.
    pub app_key: String,
    /// Host (and optional port) of the relay websocket endpoint.
    pub host: String,
    pub use_tls: bool,
    /// Prefix of every negotiation channel on this relay.
    pub channel_namespace: String,
    /// Channel-level authorization endpoint.
    pub auth_endpoint: String,
    /// User-level sign-in endpoint. Sign-in is skipped when absent.
    pub user_auth_endpoint: Option<String>,
}

/// A network traversal (STUN/TURN) server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub id: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relays that devices may reference by id.
    pub relays: Vec<RelayConfig>,
    /// Relay used by devices without a relay reference.
    pub default_relay: RelayConfig,
    /// Traversal servers that devices may reference by id.
    pub ice_servers: Vec<IceServer>,
    /// Traversal servers used by devices without references.
    pub default_ice_servers: Vec<IceServer>,
    /// Whether the connection initiator starts reconciliation once its channel opens.
    pub sync_on_connect: bool,
    pub data_channel_label: String,
    /// Largest reconciliation frame accepted or produced.
    pub max_message_bytes: usize,
}

impl SyncConfig {
    /// Resolve a device's relay reference. `None` selects the default relay;
    /// an unknown id resolves to nothing.
    pub fn resolve_relay(&self, relay_id: Option<&RelayId>) -> Option<&RelayConfig> {
        match relay_id {
            None => Some(&self.default_relay),
            Some(id) if *id == self.default_relay.id => Some(&self.default_relay),
            Some(id) => self.relays.iter().find(|relay| relay.id == *id),
        }
    }

    /// Resolve traversal server references. Unknown ids are skipped; an empty
    /// resolution falls back to the defaults.
    pub fn resolve_ice_servers(&self, ids: &[String]) -> Vec<IceServer> {
        let resolved: Vec<IceServer> = ids
            .iter()
            .filter_map(|id| self.ice_servers.iter().find(|server| server.id == *id))
            .cloned()
            .collect();

        if resolved.is_empty() {
            self.default_ice_servers.clone()
        } else {
            resolved
        }
    }
}
