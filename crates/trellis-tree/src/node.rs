//! In-memory node bookkeeping

use std::collections::BTreeMap;
use trellis_store::{NodeData, ObjectHash, Relid};

/// Containment link from a parent to one child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSlot {
    /// Child record known by hash only; not yet in the working copy
    Unloaded(ObjectHash),

    /// Child present as a [`NodeEntry`] in the working copy
    Loaded,
}

/// A node in the working copy
///
/// `persisted_hash` is the identity of the node's current record; it is set
/// on load and after each persist, and means nothing while `dirty` is true.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// The node's own (non-inherited) data
    pub data: NodeData,

    /// Containment links, keyed by child relid
    pub(crate) children: BTreeMap<Relid, ChildSlot>,

    /// Whether the node differs from its last persisted record
    pub(crate) dirty: bool,

    /// Hash of the last persisted record for this node, if any
    pub(crate) persisted_hash: Option<ObjectHash>,
}

impl NodeEntry {
    /// Entry for a freshly created (never persisted) node
    #[must_use]
    pub(crate) fn fresh(data: NodeData) -> Self {
        Self {
            data,
            children: BTreeMap::new(),
            dirty: true,
            persisted_hash: None,
        }
    }

    /// Entry reconstructed from a persisted record
    #[must_use]
    pub(crate) fn from_record(
        data: NodeData,
        children: &BTreeMap<Relid, ObjectHash>,
        hash: ObjectHash,
    ) -> Self {
        Self {
            data,
            children: children
                .iter()
                .map(|(relid, hash)| (relid.clone(), ChildSlot::Unloaded(*hash)))
                .collect(),
            dirty: false,
            persisted_hash: Some(hash),
        }
    }

    /// Child relids in relid order
    #[must_use]
    pub fn child_relids(&self) -> Vec<Relid> {
        self.children.keys().cloned().collect()
    }

    /// Whether the node has unsaved changes
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Hash of the last persisted record, if the node is clean
    #[inline]
    #[must_use]
    pub fn persisted_hash(&self) -> Option<ObjectHash> {
        if self.dirty {
            None
        } else {
            self.persisted_hash
        }
    }

    /// Smallest non-negative integer relid unused among children
    #[must_use]
    pub(crate) fn next_relid(&self) -> Relid {
        let mut index = 0u64;
        loop {
            let candidate = Relid::from_index(index);
            if !self.children.contains_key(&candidate) {
                return candidate;
            }
            index += 1;
        }
    }
}
