use async_trait::async_trait;

use crate::ports::errors::HashDiffError;
use crate::reconciliation::{AppliedDiffs, Credential, Diff, Digest};

/// Hash/diff primitives over the credential list.
///
/// Everything that can fail returns an explicit result; callers never
/// assume success.
#[async_trait]
pub trait HashDiffPort: Send + Sync {
    /// Digest of a full credential set.
    async fn hash_credentials(&self, credentials: &[Credential]) -> Digest;

    /// Digest the set would have after applying `diffs`, without mutating anything.
    async fn calculate_mocked_vault_hash(
        &self,
        credentials: &[Credential],
        diffs: &[Diff],
    ) -> Result<Digest, HashDiffError>;

    /// Apply `diffs`, returning the new set and the diffs to append to the log.
    async fn apply_diffs(
        &self,
        credentials: &[Credential],
        diffs: &[Diff],
    ) -> Result<AppliedDiffs, HashDiffError>;

    /// Diffs recorded after `hash`. Empty when `hash` is unknown or current.
    fn diffs_since_hash(&self, hash: &Digest, diff_log: &[Diff]) -> Vec<Diff>;

    /// The whole set expressed as diffs from an empty vault.
    async fn credentials_as_diffs(&self, credentials: &[Credential]) -> Vec<Diff>;
}
