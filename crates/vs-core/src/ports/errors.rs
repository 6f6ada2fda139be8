use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashDiffError {
    #[error("diff could not be decoded: {0}")]
    MalformedDiff(String),

    #[error("diff does not apply to the current credential set: {0}")]
    Inapplicable(String),

    #[error("hash engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault is locked")]
    Locked,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}
