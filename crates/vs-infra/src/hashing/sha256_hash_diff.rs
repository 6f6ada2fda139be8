//! SHA-256 hash/diff engine.
//!
//! The digest covers the credential set in id order, each entry written as
//! length-prefixed id and sealed bytes. Every diff records the digest reached
//! after it applies, so a diff log doubles as a hash chain.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest as _, Sha256};

use vs_core::ports::{HashDiffError, HashDiffPort};
use vs_core::reconciliation::AppliedDiffs;
use vs_core::{Credential, Diff, Digest};

use super::diff_op::DiffOp;

type CredentialSet = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256HashDiff;

impl Sha256HashDiff {
    pub fn new() -> Self {
        Self
    }

    /// Digest of the empty credential set, the root of every hash chain.
    pub fn empty_digest(&self) -> Digest {
        digest_of(&CredentialSet::new())
    }

    /// Diff that inserts or replaces `credential`. Its chain digest is
    /// assigned when it is applied.
    pub fn upsert(&self, credential: Credential) -> Result<Diff, HashDiffError> {
        let payload = DiffOp::Upsert { credential }.encode()?;
        Ok(Diff::new(self.empty_digest(), payload))
    }

    pub fn remove(&self, id: impl Into<String>) -> Result<Diff, HashDiffError> {
        let payload = DiffOp::Remove { id: id.into() }.encode()?;
        Ok(Diff::new(self.empty_digest(), payload))
    }

    fn apply(
        &self,
        credentials: &[Credential],
        diffs: &[Diff],
    ) -> Result<(CredentialSet, Vec<Diff>), HashDiffError> {
        let mut set: CredentialSet = credentials
            .iter()
            .map(|credential| (credential.id.clone(), credential.sealed.clone()))
            .collect();
        let mut chained = Vec::with_capacity(diffs.len());

        for diff in diffs {
            match DiffOp::decode(diff)? {
                DiffOp::Upsert { credential } => {
                    set.insert(credential.id, credential.sealed);
                }
                DiffOp::Remove { id } => {
                    if set.remove(&id).is_none() {
                        return Err(HashDiffError::Inapplicable(format!(
                            "credential {id} does not exist"
                        )));
                    }
                }
            }
            chained.push(Diff::new(digest_of(&set), diff.payload.clone()));
        }

        Ok((set, chained))
    }
}

fn digest_of(set: &CredentialSet) -> Digest {
    let mut hasher = Sha256::new();
    for (id, sealed) in set {
        hasher.update((id.len() as u64).to_be_bytes());
        hasher.update(id.as_bytes());
        hasher.update((sealed.len() as u64).to_be_bytes());
        hasher.update(sealed);
    }
    Digest::new(hex::encode(hasher.finalize()))
}

fn into_credentials(set: CredentialSet) -> Vec<Credential> {
    set.into_iter()
        .map(|(id, sealed)| Credential { id, sealed })
        .collect()
}

#[async_trait]
impl HashDiffPort for Sha256HashDiff {
    async fn hash_credentials(&self, credentials: &[Credential]) -> Digest {
        let set: CredentialSet = credentials
            .iter()
            .map(|credential| (credential.id.clone(), credential.sealed.clone()))
            .collect();
        digest_of(&set)
    }

    async fn calculate_mocked_vault_hash(
        &self,
        credentials: &[Credential],
        diffs: &[Diff],
    ) -> Result<Digest, HashDiffError> {
        let (set, _) = self.apply(credentials, diffs)?;
        Ok(digest_of(&set))
    }

    async fn apply_diffs(
        &self,
        credentials: &[Credential],
        diffs: &[Diff],
    ) -> Result<AppliedDiffs, HashDiffError> {
        let (set, diffs) = self.apply(credentials, diffs)?;
        Ok(AppliedDiffs {
            credentials: into_credentials(set),
            diffs,
        })
    }

    fn diffs_since_hash(&self, hash: &Digest, diff_log: &[Diff]) -> Vec<Diff> {
        if *hash == self.empty_digest() {
            return diff_log.to_vec();
        }
        match diff_log.iter().rposition(|diff| diff.hash == *hash) {
            Some(position) => diff_log[position + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    async fn credentials_as_diffs(&self, credentials: &[Credential]) -> Vec<Diff> {
        let mut set = CredentialSet::new();
        let mut sorted: Vec<&Credential> = credentials.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut diffs = Vec::with_capacity(sorted.len());
        for credential in sorted {
            set.insert(credential.id.clone(), credential.sealed.clone());
            let op = DiffOp::Upsert {
                credential: credential.clone(),
            };
            match op.encode() {
                Ok(payload) => diffs.push(Diff::new(digest_of(&set), payload)),
                Err(err) => {
                    tracing::error!(id = %credential.id, error = %err, "credential not encodable")
                }
            }
        }
        diffs
    }
}
