use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// Identity of the local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalReplica {
    pub device_id: DeviceId,
    /// Replica creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl LocalReplica {
    pub fn new(device_id: impl Into<DeviceId>, created_at: i64) -> Self {
        Self {
            device_id: device_id.into(),
            created_at,
        }
    }
}
