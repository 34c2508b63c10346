//! Store error taxonomy

use crate::backend::BackendError;
use crate::hash::ObjectHash;

/// Errors surfaced by [`crate::ObjectStore`]
///
/// Patch-application failures never appear here: patch insertion is a
/// best-effort optimization whose failures are logged and dropped at the
/// call site.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Hash unresolvable through cache, backup, pending buffer and backend
    #[error("object not found: {0}")]
    NotFound(ObjectHash),

    /// The backing medium failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A record could not be canonically encoded for hashing
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A prefetch path walked off the record tree
    #[error("path segment '{relid}' not present under {parent}")]
    InvalidPath { parent: ObjectHash, relid: String },
}
