mod diff_op;
mod sha256_hash_diff;

pub use diff_op::DiffOp;
pub use sha256_hash_diff::Sha256HashDiff;
