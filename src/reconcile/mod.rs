//! Cross-run reconciliation by canonical names

mod canonical;
mod merger;

pub use canonical::{canonical_key, similarity, split_timing, NameResolver};
pub use merger::{IdentityMerger, MergeError, MergeInputError, MergeOutcome, MergeSource};
