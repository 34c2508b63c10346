//! Meta validation errors

use trellis_tree::TreeError;

/// Errors surfaced by meta queries
///
/// An empty result set is never an error; filters that eliminate every
/// candidate short-circuit silently.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// Underlying graph model failure (unloaded base chain, corrupt data)
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// The supplied index was built against an older meta membership
    #[error("meta index is stale: built at generation {index}, tree is at {tree}")]
    StaleIndex { index: u64, tree: u64 },
}
