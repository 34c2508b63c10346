//! Trellis object store
//!
//! Immutable, content-addressed storage for serialized graph nodes.
//!
//! # Core Concepts
//!
//! - [`ObjectHash`]: 32-byte Blake3 hash identifying a persisted record
//! - [`NodeRecord`]: immutable serialization of a node's own data plus
//!   child relid→hash links
//! - [`PatchRecord`]: an edit-script against a named base record, resolved
//!   lazily into a full record (best-effort optimization)
//! - [`ObjectStore`]: two-generation cache, pending-persist buffer and
//!   coalesced loads over a pluggable async [`ObjectBackend`]
//! - [`NodePath`]/[`Relid`]: addressing of nodes by their containment chain
//!
//! Records are only ever inserted, never mutated; a node's identity is fixed
//! at persist time by hashing its canonical JSON form.

#![warn(missing_docs)]

mod backend;
mod cache;
mod error;
mod hash;
mod patch;
mod path;
mod record;
mod store;

pub use backend::{BackendError, MemoryBackend, ObjectBackend};
pub use cache::GenerationCache;
pub use error::StoreError;
pub use hash::ObjectHash;
pub use patch::{PatchOp, PatchRecord};
pub use path::{NodePath, PathError, Relid};
pub use record::{MemberData, MetaRules, NodeData, NodeRecord, PointerRule, ChildRule, SetData};
pub use store::{ObjectStore, StoreOptions};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
