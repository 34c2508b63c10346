//! Trellis graph model
//!
//! A mutable, in-memory working copy of a persisted node graph ("the
//! tree"). Nodes are loaded lazily by path from a
//! [`trellis_store::ObjectStore`], mutated through the [`Tree`] API, and
//! persisted back into immutable hashed records.
//!
//! Structure is a strict containment tree; inheritance is a separate DAG
//! rooted at the single universal base (the node at the root path). A
//! node's *effective* attribute/pointer/set view is the non-destructive
//! merge of its own data with its base chain's data, own values winning.

#![warn(missing_docs)]

mod error;
mod node;
mod ops;
mod persist;
mod tree;

pub use error::TreeError;
pub use node::{ChildSlot, NodeEntry};
pub use persist::PersistResult;
pub use tree::{Tree, META_ASPECT_SET};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
