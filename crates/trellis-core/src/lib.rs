//! Trellis session facade
//!
//! Ties the store, graph model and merge engine together behind a
//! [`Project`]: open a working copy from a snapshot hash, mutate it,
//! commit it back, and reconcile divergent snapshots with a three-way
//! merge. The merge outcome carries the `{merge, items}` payload an
//! external branch-head compare-and-swap layer consumes: empty `items`
//! means a clean fast-forward candidate, anything else needs resolution.

#![warn(missing_docs)]

mod error;
mod project;

pub use error::CoreError;
pub use project::{CommitResult, MergeOutcome, Project};

// Re-exported so facade callers rarely need the member crates directly.
pub use trellis_merge::{ConflictItem, MergeResult, TreeDiff};
pub use trellis_meta::{ChildQuery, MetaCache, MetaError, MetaIndex, MetaQuery};
pub use trellis_store::{
    ChildRule, MemoryBackend, MetaRules, NodePath, ObjectHash, ObjectStore, PointerRule, Relid,
    StoreOptions,
};
pub use trellis_tree::{Tree, META_ASPECT_SET};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
