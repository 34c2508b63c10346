//! Meta element index
//!
//! A side-table of the type-definition nodes reachable from the root's
//! tracked membership set, keyed by the tree's meta generation. The index
//! is rebuilt (not mutated) when the generation moves on; the tree bumps
//! that generation exactly on the mutations that touch the tracked set.

use trellis_store::NodePath;
use trellis_tree::{Tree, META_ASPECT_SET};

/// Cached index of meta-model elements for one root generation
#[derive(Debug, Clone)]
pub struct MetaIndex {
    elements: Vec<NodePath>,
    generation: u64,
}

impl MetaIndex {
    /// Build the index from the root's current `MetaAspectSet` membership
    ///
    /// Members whose nodes are not in the working copy are skipped (their
    /// rules could not be consulted anyway) with a trace log.
    #[must_use]
    pub fn build(tree: &Tree) -> Self {
        let mut elements = Vec::new();
        if let Ok(members) = tree.set_members(&NodePath::root(), META_ASPECT_SET) {
            for member in members.members.keys() {
                if tree.is_loaded(member) {
                    elements.push(member.clone());
                } else {
                    tracing::trace!(member = %member, "skipping unloaded meta element");
                }
            }
        }
        elements.sort();
        Self {
            elements,
            generation: tree.meta_generation(),
        }
    }

    /// The indexed element paths, sorted
    #[inline]
    #[must_use]
    pub fn elements(&self) -> &[NodePath] {
        &self.elements
    }

    /// Whether a path is a registered meta element
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &NodePath) -> bool {
        self.elements.binary_search(path).is_ok()
    }

    /// Generation the index was built against
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the index still matches the tree's meta membership
    #[inline]
    #[must_use]
    pub fn is_current(&self, tree: &Tree) -> bool {
        self.generation == tree.meta_generation()
    }
}
