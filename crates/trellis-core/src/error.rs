//! Facade errors

use trellis_merge::MergeError;
use trellis_store::StoreError;
use trellis_tree::TreeError;

/// Errors surfaced by [`crate::Project`] operations
///
/// Merge conflicts are not errors; they come back as data in the merge
/// payload.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Object store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Working-copy failure
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Diff/merge failure
    #[error(transparent)]
    Merge(#[from] MergeError),
}
