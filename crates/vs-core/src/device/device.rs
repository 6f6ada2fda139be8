use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, RelayId};

/// A linked remote replica, as held by the vault's device registry.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Relay used to negotiate with this device; `None` selects the built-in relay.
    pub relay_id: Option<RelayId>,
    /// Traversal servers (by configured id); empty selects the built-in ones.
    #[serde(default)]
    pub ice_server_ids: Vec<String>,
    /// When the remote replica was created.
    pub created_at: i64,
    /// When this device was linked to the local vault.
    pub linked_at: i64,
}

impl Device {
    pub fn new(
        id: impl Into<DeviceId>,
        name: impl Into<String>,
        created_at: i64,
        linked_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            relay_id: None,
            ice_server_ids: Vec::new(),
            created_at,
            linked_at,
        }
    }

    pub fn with_relay(mut self, relay_id: impl Into<RelayId>) -> Self {
        self.relay_id = Some(relay_id.into());
        self
    }

    pub fn with_ice_servers(mut self, ids: Vec<String>) -> Self {
        self.ice_server_ids = ids;
        self
    }
}

/// Legacy device entry carried on the reconciliation wire. Normally empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDeviceRecord {
    pub id: String,
    pub name: String,
}
