//! Graph model error taxonomy

use trellis_store::{NodePath, Relid, StoreError};

/// Errors surfaced by [`crate::Tree`] operations
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The path addresses no node in the tree
    #[error("no node at {0}")]
    NotFound(NodePath),

    /// The node exists but has not been loaded into the working copy
    #[error("node at {0} is not loaded")]
    NotLoaded(NodePath),

    /// Base assignment would create an inheritance cycle, or the base is
    /// unresolvable
    #[error("invalid base {base} for node {node}")]
    InvalidBase { node: NodePath, base: NodePath },

    /// Containment target is the node itself or one of its descendants
    #[error("invalid parent {parent} for node {node}")]
    InvalidParent { node: NodePath, parent: NodePath },

    /// Explicitly requested relid already taken among siblings
    #[error("relid '{relid}' already in use under {parent}")]
    RelidInUse { parent: NodePath, relid: Relid },

    /// Operation not applicable to the root node
    #[error("operation not applicable to the root node")]
    RootOperation,

    /// Object store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Record serialization failure during persist
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
