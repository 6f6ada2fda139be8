use async_trait::async_trait;

use crate::device::{Device, LocalReplica};
use crate::ids::DeviceId;
use crate::ports::errors::VaultError;

/// The vault's registry of linked devices.
#[async_trait]
pub trait DeviceRegistryPort: Send + Sync {
    fn local_replica(&self) -> LocalReplica;

    async fn linked_devices(&self) -> Result<Vec<Device>, VaultError>;

    async fn find_device(&self, id: &DeviceId) -> Result<Option<Device>, VaultError> {
        Ok(self
            .linked_devices()
            .await?
            .into_iter()
            .find(|device| device.id == *id))
    }
}
