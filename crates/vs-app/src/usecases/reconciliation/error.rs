use thiserror::Error;

use vs_core::ports::{HashDiffError, VaultError};
use vs_core::reconciliation::WireError;
use vs_core::DeviceId;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no open data channel to device {0}")]
    NoOpenChannel(DeviceId),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("data channel send failed: {0:#}")]
    Transport(anyhow::Error),
}

/// Why a verify-then-commit step did not write anything.
#[derive(Debug, Error)]
pub(crate) enum CommitError {
    #[error("digest after applying the diffs would be {actual}, expected {expected}")]
    DigestMismatch {
        expected: vs_core::Digest,
        actual: vs_core::Digest,
    },

    #[error(transparent)]
    HashDiff(#[from] HashDiffError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}
