use async_trait::async_trait;

use crate::ports::errors::VaultError;
use crate::reconciliation::{Credential, Diff, VaultSnapshot};

/// Access to the local credential list and its diff log.
#[async_trait]
pub trait VaultStatePort: Send + Sync {
    /// Current credentials and diff log, read at call time.
    async fn snapshot(&self) -> Result<VaultSnapshot, VaultError>;

    /// Replace the credential list and append `appended` to the diff log, atomically.
    async fn commit(
        &self,
        credentials: Vec<Credential>,
        appended: Vec<Diff>,
    ) -> Result<(), VaultError>;
}
