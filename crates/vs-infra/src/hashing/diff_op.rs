use serde::{Deserialize, Serialize};

use vs_core::ports::HashDiffError;
use vs_core::{Credential, Diff};

/// One change to a credential set, as carried in a diff payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOp {
    Upsert { credential: Credential },
    Remove { id: String },
}

impl DiffOp {
    pub fn encode(&self) -> Result<Vec<u8>, HashDiffError> {
        serde_json::to_vec(self).map_err(|e| HashDiffError::Engine(e.to_string()))
    }

    pub fn decode(diff: &Diff) -> Result<Self, HashDiffError> {
        serde_json::from_slice(&diff.payload)
            .map_err(|e| HashDiffError::MalformedDiff(e.to_string()))
    }
}
