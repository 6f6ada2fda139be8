//! Vault state and device registry held in memory.

use async_trait::async_trait;
use tokio::sync::RwLock;

use vs_core::ports::{DeviceRegistryPort, HashDiffPort, VaultError, VaultStatePort};
use vs_core::reconciliation::VaultSnapshot;
use vs_core::{Credential, Device, DeviceId, Diff, Digest, LocalReplica};

#[derive(Debug, Default)]
struct VaultState {
    snapshot: VaultSnapshot,
    devices: Vec<Device>,
    locked: bool,
}

#[derive(Debug)]
pub struct InMemoryVault {
    local: LocalReplica,
    state: RwLock<VaultState>,
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new(LocalReplica::new(DeviceId::generate(), 0))
    }
}

impl InMemoryVault {
    pub fn new(local: LocalReplica) -> Self {
        Self {
            local,
            state: RwLock::new(VaultState::default()),
        }
    }

    pub fn with_devices(self, devices: Vec<Device>) -> Self {
        Self {
            state: RwLock::new(VaultState {
                devices,
                ..VaultState::default()
            }),
            ..self
        }
    }

    /// Link a device, replacing an earlier record with the same id.
    pub async fn link_device(&self, device: Device) {
        let mut state = self.state.write().await;
        state.devices.retain(|existing| existing.id != device.id);
        state.devices.push(device);
    }

    pub async fn unlink_device(&self, id: &DeviceId) -> Result<(), VaultError> {
        let mut state = self.state.write().await;
        let before = state.devices.len();
        state.devices.retain(|device| device.id != *id);
        if state.devices.len() == before {
            return Err(VaultError::DeviceNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_locked(&self, locked: bool) {
        self.state.write().await.locked = locked;
    }

    /// Apply a local edit and extend the diff log.
    pub async fn edit(&self, engine: &dyn HashDiffPort, diffs: &[Diff]) -> anyhow::Result<Digest> {
        let snapshot = self.snapshot().await?;
        let applied = engine.apply_diffs(&snapshot.credentials, diffs).await?;
        let hash = engine.hash_credentials(&applied.credentials).await;
        self.commit(applied.credentials, applied.diffs).await?;
        Ok(hash)
    }

    pub async fn credentials(&self) -> Vec<Credential> {
        self.state.read().await.snapshot.credentials.clone()
    }
}

#[async_trait]
impl VaultStatePort for InMemoryVault {
    async fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        let state = self.state.read().await;
        if state.locked {
            return Err(VaultError::Locked);
        }
        Ok(state.snapshot.clone())
    }

    async fn commit(
        &self,
        credentials: Vec<Credential>,
        appended: Vec<Diff>,
    ) -> Result<(), VaultError> {
        let mut state = self.state.write().await;
        if state.locked {
            return Err(VaultError::Locked);
        }
        tracing::debug!(
            credentials = credentials.len(),
            appended = appended.len(),
            "vault commit"
        );
        state.snapshot.credentials = credentials;
        state.snapshot.diff_log.extend(appended);
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistryPort for InMemoryVault {
    fn local_replica(&self) -> LocalReplica {
        self.local.clone()
    }

    async fn linked_devices(&self) -> Result<Vec<Device>, VaultError> {
        Ok(self.state.read().await.devices.clone())
    }
}
