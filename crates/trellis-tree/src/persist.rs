//! Persistence
//!
//! Persisting walks the dirty spine bottom-up, serializes each dirty node
//! into an immutable [`NodeRecord`], hashes it, and returns the new root
//! hash together with the map of newly created records. The tree remains
//! usable afterwards; only the dirty flags and cached hashes change.

use crate::error::TreeError;
use crate::node::ChildSlot;
use crate::tree::Tree;
use std::collections::BTreeMap;
use trellis_store::{NodePath, NodeRecord, ObjectHash};

/// Output of [`Tree::persist`]: the new root identity plus every record the
/// caller must hand to the object store / storage-commit API
#[derive(Debug, Clone)]
pub struct PersistResult {
    /// Content hash of the new root record
    pub root_hash: ObjectHash,

    /// Newly serialized records, keyed by hash
    pub objects: BTreeMap<ObjectHash, NodeRecord>,
}

impl Tree {
    /// Serialize all dirty nodes bottom-up into immutable records
    ///
    /// Unloaded children keep the hashes their parents already recorded;
    /// clean loaded nodes are reused by hash without re-serialization.
    ///
    /// # Errors
    /// Propagates canonical-encoding failures.
    pub fn persist(&mut self) -> Result<PersistResult, TreeError> {
        let mut objects = BTreeMap::new();

        // Deepest first, so every child's hash is fixed before its parent
        // serializes.
        let mut paths: Vec<NodePath> = self.nodes.keys().cloned().collect();
        paths.sort_by_key(|path| std::cmp::Reverse(path.depth()));

        for path in paths {
            let entry = self.node(&path)?;
            if !entry.dirty {
                continue;
            }
            let mut children = BTreeMap::new();
            for (relid, slot) in &entry.children {
                let hash = match slot {
                    ChildSlot::Unloaded(hash) => *hash,
                    ChildSlot::Loaded => {
                        let child = self.node(&path.child(relid.clone()))?;
                        child
                            .persisted_hash
                            .ok_or_else(|| TreeError::NotLoaded(path.child(relid.clone())))?
                    }
                };
                children.insert(relid.clone(), hash);
            }
            let record = NodeRecord {
                data: entry.data.clone(),
                children,
            };
            let hash = record.compute_hash().map_err(TreeError::Serialization)?;
            objects.insert(hash, record);

            let entry = self.node_mut(&path)?;
            entry.persisted_hash = Some(hash);
            entry.dirty = false;
        }

        let root_hash = self
            .node(&NodePath::root())?
            .persisted_hash
            .ok_or_else(|| TreeError::NotLoaded(NodePath::root()))?;
        self.root_hash = Some(root_hash);
        tracing::debug!(root = %root_hash.short(), new_records = objects.len(), "persisted tree");
        Ok(PersistResult { root_hash, objects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_store::{MemoryBackend, ObjectStore, StoreOptions};

    fn fresh_store() -> Arc<ObjectStore> {
        Arc::new(ObjectStore::new(
            Arc::new(MemoryBackend::new()),
            StoreOptions::default(),
        ))
    }

    #[tokio::test]
    async fn persist_then_reload_roundtrips_effective_data() {
        let store = fresh_store();
        let mut tree = Tree::new(Arc::clone(&store));
        let root = NodePath::root();
        let base = tree.create_node(&root, Some(root.clone()), None).unwrap();
        tree.set_attribute(&base, "kind", json!("widget")).unwrap();
        let child = tree.create_node(&base, Some(base.clone()), None).unwrap();
        tree.set_pointer(&child, "origin", Some(base.clone())).unwrap();

        let result = tree.persist().unwrap();
        for record in result.objects.into_values() {
            store.insert(record).unwrap();
        }

        let mut reloaded = Tree::open(Arc::clone(&store), result.root_hash)
            .await
            .unwrap();
        reloaded.load_subtree(&root).await.unwrap();

        assert_eq!(
            reloaded.attribute(&base, "kind").unwrap(),
            Some(&json!("widget"))
        );
        // Inherited through the freshly reloaded base chain.
        assert_eq!(
            reloaded.attribute(&child, "kind").unwrap(),
            Some(&json!("widget"))
        );
        assert_eq!(
            reloaded.pointer(&child, "origin").unwrap(),
            Some(Some(base))
        );
        assert_eq!(
            reloaded.node(&child).unwrap().data.guid,
            tree.node(&child).unwrap().data.guid
        );
    }

    #[tokio::test]
    async fn persist_is_incremental() {
        let store = fresh_store();
        let mut tree = Tree::new(Arc::clone(&store));
        let root = NodePath::root();
        let a = tree.create_node(&root, Some(root.clone()), None).unwrap();
        let b = tree.create_node(&root, Some(root.clone()), None).unwrap();
        let first = tree.persist().unwrap();
        assert_eq!(first.objects.len(), 3); // root, a, b

        // Touching one leaf re-serializes only that leaf and the root spine.
        tree.set_attribute(&a, "touched", json!(true)).unwrap();
        let second = tree.persist().unwrap();
        assert_eq!(second.objects.len(), 2);
        assert_ne!(first.root_hash, second.root_hash);

        // The untouched sibling keeps its record identity.
        let b_hash = tree.node(&b).unwrap().persisted_hash().unwrap();
        assert!(first.objects.contains_key(&b_hash));
    }

    #[tokio::test]
    async fn persist_without_changes_is_stable() {
        let store = fresh_store();
        let mut tree = Tree::new(Arc::clone(&store));
        let root = NodePath::root();
        tree.create_node(&root, Some(root.clone()), None).unwrap();
        let first = tree.persist().unwrap();
        let second = tree.persist().unwrap();
        assert_eq!(first.root_hash, second.root_hash);
        assert!(second.objects.is_empty());
    }
}
