//! Hybrid reference resolution.
//!
//! Chooses between the index tier and live analyzers for a project and
//! merges their answers into one map per batch.
mod hybrid;
mod tier;

pub use hybrid::{HybridResolver, ResolverInfo};
pub use tier::{decide_tier, ResolverTier};
