//! Merge engine errors
//!
//! Conflicts are never errors; they travel as [`crate::ConflictItem`] data
//! so the caller can choose a resolution strategy. Errors here mean the
//! diff could not be generated or replayed at all.

use trellis_store::PathError;
use trellis_tree::TreeError;

/// Errors surfaced by diff generation and application
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Underlying graph model failure (unloaded node, invalid move target)
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A rewritten path could not be formed
    #[error(transparent)]
    Path(#[from] PathError),

    /// A diff entry is internally inconsistent (e.g. a created entry keyed
    /// at the root, or a move without a source)
    #[error("malformed diff entry at {path}: {reason}")]
    MalformedEntry { path: String, reason: &'static str },
}
