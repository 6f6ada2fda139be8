use serde::{Deserialize, Serialize};

/// Content digest of a replica's credential set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Digest {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A sealed credential. Contents are opaque to the sync core.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub sealed: Vec<u8>,
}

impl Credential {
    pub fn new(id: impl Into<String>, sealed: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            sealed: sealed.into(),
        }
    }
}

// Sealed payloads stay out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("sealed", &format_args!("<{} bytes>", self.sealed.len()))
            .finish()
    }
}

/// An ordered change record produced by the hash/diff collaborator.
///
/// `hash` is the digest the credential set reaches once this change has
/// been applied, which is what links diffs into a hash chain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub hash: Digest,
    pub payload: Vec<u8>,
}

impl Diff {
    pub fn new(hash: Digest, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            hash,
            payload: payload.into(),
        }
    }
}

impl std::fmt::Debug for Diff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diff")
            .field("hash", &self.hash)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// Current credential list plus the diff log that led to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultSnapshot {
    pub credentials: Vec<Credential>,
    pub diff_log: Vec<Diff>,
}

/// Result of applying diffs: the new credential list and the diffs to
/// append to the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedDiffs {
    pub credentials: Vec<Credential>,
    pub diffs: Vec<Diff>,
}
