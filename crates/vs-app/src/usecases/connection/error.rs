use thiserror::Error;

use vs_core::ports::VaultError;
use vs_core::{DeviceId, RelayId, TransportStatus};

/// Why a connect request was refused.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("device {0} is not linked to this vault")]
    UnknownDevice(DeviceId),

    #[error("relay {relay_id} referenced by device {device_id} is not configured")]
    UnknownRelay { device_id: DeviceId, relay_id: RelayId },

    #[error("device {device_id} already has a connection in state {status:?}")]
    AlreadyActive {
        device_id: DeviceId,
        status: TransportStatus,
    },

    #[error("device registry unavailable: {0}")]
    Registry(#[from] VaultError),

    #[error("negotiation channel unavailable: {0:#}")]
    Negotiation(anyhow::Error),

    #[error("failed to create peer transport: {0:#}")]
    Transport(anyhow::Error),
}
