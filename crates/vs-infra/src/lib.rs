pub mod hashing;
pub mod vault;

pub use hashing::{DiffOp, Sha256HashDiff};
pub use vault::InMemoryVault;
