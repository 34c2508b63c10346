//! Project facade
//!
//! One [`Project`] fronts one object store. Sessions open independent
//! working copies from snapshot hashes, commit them back as new snapshots,
//! and reconcile divergent snapshots through a three-way merge whose
//! output is exactly the payload an external branch-head compare-and-swap
//! needs.

use crate::error::CoreError;
use std::collections::BTreeMap;
use std::sync::Arc;
use trellis_merge::{apply_tree_diff, generate_tree_diff, try_to_concat_changes, MergeResult};
use trellis_store::{NodePath, NodeRecord, ObjectHash, ObjectStore};
use trellis_tree::Tree;

/// Output of [`Project::commit`]: the new snapshot identity plus every
/// record handed to the store, for an external storage-commit API
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// Content hash of the committed root record
    pub root_hash: ObjectHash,

    /// Every record newly persisted by the commit, keyed by hash
    pub objects: BTreeMap<ObjectHash, NodeRecord>,
}

/// Outcome of a three-way merge
///
/// `root_hash` is `Some` only for a clean merge (no conflict items); it is
/// the committed snapshot of the reconciled tree. On conflicts the caller
/// gets the full payload and no new snapshot.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The `{merge, items}` payload for the branch-synchronization layer
    pub payload: MergeResult,

    /// Snapshot of the merged tree, when the merge was clean
    pub root_hash: Option<ObjectHash>,
}

/// Session entry point over one object store
#[derive(Debug, Clone)]
pub struct Project {
    store: Arc<ObjectStore>,
}

impl Project {
    /// Project over a store
    #[must_use]
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Fresh working copy containing only a new root
    #[must_use]
    pub fn create(&self) -> Tree {
        Tree::new(Arc::clone(&self.store))
    }

    /// Open a fully loaded working copy from a snapshot
    ///
    /// # Errors
    /// Fails if any record of the snapshot cannot be loaded.
    pub async fn open(&self, root_hash: ObjectHash) -> Result<Tree, CoreError> {
        let mut tree = Tree::open(Arc::clone(&self.store), root_hash).await?;
        tree.load_subtree(&NodePath::root()).await?;
        Ok(tree)
    }

    /// Persist a working copy and hand its records to the store
    ///
    /// The records stay in the store's queued-persist buffer until
    /// [`ObjectStore::flush`] writes them through the backend.
    ///
    /// # Errors
    /// Propagates persistence failures.
    pub fn commit(&self, tree: &mut Tree) -> Result<CommitResult, CoreError> {
        let result = tree.persist()?;
        for record in result.objects.values() {
            self.store.insert(record.clone())?;
        }
        tracing::debug!(
            root = %result.root_hash.short(),
            records = result.objects.len(),
            "committed snapshot"
        );
        Ok(CommitResult {
            root_hash: result.root_hash,
            objects: result.objects,
        })
    }

    /// Reconcile two snapshots derived from a shared ancestor
    ///
    /// Both derived snapshots are diffed against the ancestor (with their
    /// root hashes as diff origins, so displacement is deterministic and
    /// content-derived), the diffs are concatenated, and — when no
    /// conflicts remain — the merged change-set is applied to a fresh copy
    /// of the ancestor and committed.
    ///
    /// # Errors
    /// Propagates load, diff and apply failures; conflicts are data in the
    /// returned payload, never errors.
    pub async fn three_way_merge(
        &self,
        ancestor: ObjectHash,
        mine: ObjectHash,
        theirs: ObjectHash,
    ) -> Result<MergeOutcome, CoreError> {
        let ancestor_tree = self.open(ancestor).await?;
        let mine_tree = self.open(mine).await?;
        let theirs_tree = self.open(theirs).await?;

        let my_diff = generate_tree_diff(&ancestor_tree, &mine_tree, mine.to_string())?;
        let their_diff = generate_tree_diff(&ancestor_tree, &theirs_tree, theirs.to_string())?;
        let payload = try_to_concat_changes(&my_diff, &their_diff)?;

        if !payload.items.is_empty() {
            tracing::debug!(
                conflicts = payload.items.len(),
                "merge has conflicts; no snapshot produced"
            );
            return Ok(MergeOutcome {
                payload,
                root_hash: None,
            });
        }

        let mut merged = self.open(ancestor).await?;
        apply_tree_diff(&mut merged, &payload.merge)?;
        let committed = self.commit(&mut merged)?;
        Ok(MergeOutcome {
            payload,
            root_hash: Some(committed.root_hash),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use trellis_store::{MemoryBackend, StoreOptions};

    fn project() -> Project {
        Project::new(Arc::new(ObjectStore::new(
            Arc::new(MemoryBackend::new()),
            StoreOptions::default(),
        )))
    }

    #[tokio::test]
    async fn commit_then_open_roundtrips() {
        let project = project();
        let root = NodePath::root();
        let mut tree = project.create();
        let node = tree.create_node(&root, Some(root.clone()), None).unwrap();
        tree.set_attribute(&node, "name", json!("thing")).unwrap();

        let commit = project.commit(&mut tree).unwrap();
        let reopened = project.open(commit.root_hash).await.unwrap();
        assert_eq!(
            reopened.attribute(&node, "name").unwrap(),
            Some(&json!("thing"))
        );
        assert_eq!(reopened.root_hash(), Some(commit.root_hash));
    }

    #[tokio::test]
    async fn merge_of_identical_snapshots_is_clean_and_empty() {
        let project = project();
        let root = NodePath::root();
        let mut tree = project.create();
        tree.create_node(&root, Some(root.clone()), None).unwrap();
        let base = project.commit(&mut tree).unwrap().root_hash;

        let outcome = project.three_way_merge(base, base, base).await.unwrap();
        assert!(outcome.payload.items.is_empty());
        assert!(outcome.payload.merge.is_empty());
        assert_eq!(outcome.root_hash, Some(base));
    }
}
