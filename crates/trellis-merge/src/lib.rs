//! Trellis diff/merge engine
//!
//! State-free, pure functions over immutable diff structures:
//!
//! - [`generate_tree_diff`]: per-node comparison of a derived working copy
//!   against its ancestor snapshot, matched by guid so moves are detected
//!   as moves rather than delete/create pairs.
//! - [`try_to_concat_changes`]: combines two independently generated diffs
//!   into one change-set. Same-relid creations are a *collision*, resolved
//!   deterministically by displacing one side; delete-versus-modify and
//!   same-property disagreements are *conflicts*, reported as data in
//!   [`MergeResult::items`] and withheld from the merge.
//! - [`apply_tree_diff`]: replays a change-set against a live tree in an
//!   order that keeps structural prerequisites satisfied (deletions
//!   deepest-first, creations and moves shallowest-first, then properties).
//!
//! Collision resolution is symmetric: both argument orders of
//! [`try_to_concat_changes`] produce isomorphic merged trees. The displaced
//! side is chosen by comparing diff origin identifiers, never argument
//! position.

#![warn(missing_docs)]

mod apply;
mod concat;
mod diff;
mod error;
mod generate;

pub use apply::apply_tree_diff;
pub use concat::try_to_concat_changes;
pub use diff::{Change, ConflictItem, MergeResult, NodeDiff, SetDiff, TreeDiff};
pub use error::MergeError;
pub use generate::generate_tree_diff;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
