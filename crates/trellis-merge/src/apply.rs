//! Diff application
//!
//! Replays a change-set against a live working copy. Structural changes
//! carry dependencies on each other: a deletion must wait for moves that
//! rescue nodes out of the doomed subtree, a creation or move must wait for
//! whatever currently occupies its target slot to vacate it, and a parent
//! must exist before children are placed under it. The replay runs the
//! structural operations as a worklist, deferring any operation whose
//! prerequisite has not happened yet and breaking the rare genuine cycle
//! (sibling relid swaps, relid clashes with pre-existing siblings) by
//! relocating onto a guid-derived relid. Property changes run last, once
//! the final shape is in place.

use crate::diff::{Change, NodeDiff, TreeDiff};
use crate::error::MergeError;
use trellis_store::{NodeData, NodePath, Relid};
use trellis_tree::{Tree, TreeError};
use uuid::Uuid;

/// One structural change awaiting its prerequisites
enum StructuralOp {
    Delete(NodePath),
    Create { target: NodePath, data: NodeData },
    Move { target: NodePath, source: NodePath },
}

/// Replay `diff` against `tree`
///
/// Source paths of moves are given in ancestor coordinates; they are
/// rewritten through the moves already applied, so nested relocations
/// resolve correctly.
///
/// # Errors
/// Propagates working-copy failures (missing nodes, occupied slots that
/// nothing in the diff frees). A clean concatenation result never triggers
/// these.
pub fn apply_tree_diff(tree: &mut Tree, diff: &TreeDiff) -> Result<(), MergeError> {
    // Deletions deepest-first, then creations and moves shallowest target
    // first; the worklist re-orders only where a dependency forces it.
    let mut pending: Vec<StructuralOp> = Vec::new();
    let mut deletions: Vec<&NodePath> = diff
        .entries
        .iter()
        .filter(|(_, entry)| entry.deleted)
        .map(|(path, _)| path)
        .collect();
    deletions.sort_by_key(|path| std::cmp::Reverse(path.depth()));
    pending.extend(deletions.into_iter().map(|p| StructuralOp::Delete(p.clone())));

    let mut structural: Vec<(&NodePath, &NodeDiff)> = diff
        .entries
        .iter()
        .filter(|(_, entry)| entry.created.is_some() || entry.moved_from.is_some())
        .collect();
    structural.sort_by_key(|(path, _)| (path.depth(), (*path).clone()));
    for (path, entry) in structural {
        if path.is_root() {
            return Err(MergeError::MalformedEntry {
                path: path.to_string(),
                reason: "structural entry keyed at the root",
            });
        }
        if let Some(data) = &entry.created {
            let mut data = data.clone();
            data.relid = path
                .relid()
                .cloned()
                .unwrap_or_else(|| unreachable!("non-root path has a relid"));
            pending.push(StructuralOp::Create {
                target: path.clone(),
                data,
            });
        } else if let Some(source) = &entry.moved_from {
            pending.push(StructuralOp::Move {
                target: path.clone(),
                source: source.clone(),
            });
        }
    }

    // `applied` maps each relocation in order (moves, parking hops), used
    // to rewrite move sources given in ancestor coordinates. `adjustments`
    // records the rare apply-time shifts of *final* coordinates (a created
    // node landing on an extended relid), which also displace descendant
    // targets and property paths.
    let mut applied: Vec<(NodePath, NodePath)> = Vec::new();
    let mut adjustments: Vec<(NodePath, NodePath)> = Vec::new();

    while !pending.is_empty() {
        let blocked_sources: Vec<NodePath> = pending
            .iter()
            .filter_map(|op| match op {
                StructuralOp::Move { source, .. } => {
                    Some(rebase_through(source.clone(), &applied))
                }
                _ => None,
            })
            .collect();

        let mut next: Vec<StructuralOp> = Vec::with_capacity(pending.len());
        let mut progressed = false;
        let mut last_error: Option<TreeError> = None;

        for op in pending {
            match op {
                StructuralOp::Delete(path) => {
                    // A pending move still sources inside this subtree;
                    // it must escape before the subtree goes.
                    if blocked_sources.iter().any(|src| path.is_prefix_of(src)) {
                        next.push(StructuralOp::Delete(path));
                        continue;
                    }
                    if tree.is_loaded(&path) {
                        tree.delete_node(&path).map_err(MergeError::from)?;
                    }
                    progressed = true;
                }
                StructuralOp::Create { target, data } => {
                    let landed = rebase_through(target.clone(), &adjustments);
                    let parent = landed.parent().unwrap_or_else(NodePath::root);
                    let mut placed = data.clone();
                    if let Some(relid) = landed.relid() {
                        placed.relid = relid.clone();
                    }
                    match tree.insert_node_data(&parent, placed) {
                        Ok(_) => progressed = true,
                        Err(err) if is_deferrable(&err) => {
                            last_error = Some(err);
                            next.push(StructuralOp::Create { target, data });
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                StructuralOp::Move { target, source } => {
                    let from = rebase_through(source.clone(), &applied);
                    let to = rebase_through(target.clone(), &adjustments);
                    let parent = to.parent().unwrap_or_else(NodePath::root);
                    match tree.move_node_as(&from, &parent, to.relid().cloned()) {
                        Ok(landed) => {
                            applied.push((from, landed));
                            progressed = true;
                        }
                        Err(err) if is_deferrable(&err) => {
                            last_error = Some(err);
                            next.push(StructuralOp::Move { target, source });
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }

        if !progressed && !next.is_empty() {
            unblock(tree, &next, &mut applied, &mut adjustments, last_error)?;
        }
        pending = next;
    }

    // Property changes on the final shape. A `deleted` flag only
    // suppresses this when nothing replaced the old occupant; a combined
    // delete-then-create/move entry still carries changes for the new one.
    for (path, entry) in &diff.entries {
        if entry.deleted && !entry.modifies() {
            continue;
        }
        let path = rebase_through(path.clone(), &adjustments);
        apply_properties(tree, &path, entry)?;
    }
    Ok(())
}

/// Whether a structural failure may resolve once other pending operations
/// have run
fn is_deferrable(err: &TreeError) -> bool {
    matches!(
        err,
        TreeError::RelidInUse { .. } | TreeError::NotLoaded(_) | TreeError::NotFound(_)
    )
}

/// Break a structural stall: every remaining operation deferred without
/// progress
///
/// Two genuine cycles exist. Sibling relid swaps leave each move's target
/// occupied by the other's source; parking one occupant on a guid-derived
/// relid opens the cycle. A created node clashing with a pre-existing
/// sibling that nothing in the diff removes gets its relid extended with
/// further guid digits.
fn unblock(
    tree: &mut Tree,
    pending: &[StructuralOp],
    applied: &mut Vec<(NodePath, NodePath)>,
    adjustments: &mut Vec<(NodePath, NodePath)>,
    last_error: Option<TreeError>,
) -> Result<(), MergeError> {
    let sources: Vec<NodePath> = pending
        .iter()
        .filter_map(|op| match op {
            StructuralOp::Move { source, .. } => Some(rebase_through(source.clone(), applied)),
            _ => None,
        })
        .collect();

    for op in pending {
        let StructuralOp::Move { target, .. } = op else {
            continue;
        };
        let to = rebase_through(target.clone(), adjustments);
        if !tree.is_loaded(&to) || !sources.contains(&to) {
            continue;
        }
        // The occupant is itself waiting to move away; park it aside so
        // both moves can complete.
        let guid = tree.node(&to).map_err(MergeError::from)?.data.guid;
        let parent = to.parent().unwrap_or_else(NodePath::root);
        let parked = park_aside(tree, &to, &parent, guid)?;
        tracing::debug!(from = %to, to = %parked, "parked slot occupant to break a move cycle");
        applied.push((to, parked));
        return Ok(());
    }

    for op in pending {
        let StructuralOp::Create { target, data } = op else {
            continue;
        };
        let to = rebase_through(target.clone(), adjustments);
        if !tree.is_loaded(&to) || sources.contains(&to) {
            continue;
        }
        let freed_later = pending.iter().any(|other| {
            matches!(other, StructuralOp::Delete(path) if path.is_prefix_of(&to))
        });
        if freed_later {
            continue;
        }
        // The slot is held by a node the diff never releases; extend the
        // guid-derived relid until it clears the siblings.
        let parent = to.parent().unwrap_or_else(NodePath::root);
        let hex = data.guid.simple().to_string();
        for len in 8..=hex.len() {
            let relid = Relid::new(&hex[..len])?;
            let candidate = parent.child(relid);
            if candidate != to && !tree.is_loaded(&candidate) {
                tracing::debug!(from = %to, to = %candidate, "extended relid of a blocked creation");
                adjustments.push((to, candidate));
                return Ok(());
            }
        }
    }

    Err(last_error.map_or_else(
        || MergeError::MalformedEntry {
            path: String::from("/"),
            reason: "structural changes do not converge",
        },
        MergeError::from,
    ))
}

/// Move the node at `path` onto a free guid-derived relid under `parent`
fn park_aside(
    tree: &mut Tree,
    path: &NodePath,
    parent: &NodePath,
    guid: Uuid,
) -> Result<NodePath, MergeError> {
    let hex = guid.simple().to_string();
    for len in 8..=hex.len() {
        let relid = Relid::new(&hex[..len])?;
        match tree.move_node_as(path, parent, Some(relid)) {
            Ok(landed) => return Ok(landed),
            Err(TreeError::RelidInUse { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Err(MergeError::MalformedEntry {
        path: path.to_string(),
        reason: "no free guid-derived relid to park at",
    })
}

fn rebase_through(mut path: NodePath, relocations: &[(NodePath, NodePath)]) -> NodePath {
    for (from, to) in relocations {
        if let Some(rebased) = path.rebase(from, to) {
            path = rebased;
        }
    }
    path
}

fn apply_properties(tree: &mut Tree, path: &NodePath, entry: &NodeDiff) -> Result<(), MergeError> {
    if let Some(Change::Set(base)) = &entry.base {
        tree.set_base(path, base.clone()).map_err(MergeError::from)?;
    }
    for (name, change) in &entry.attributes {
        match change {
            Change::Set(value) => tree.set_attribute(path, name, value.clone()),
            Change::Remove => tree.del_attribute(path, name),
        }
        .map_err(MergeError::from)?;
    }
    for (name, change) in &entry.pointers {
        match change {
            Change::Set(target) => tree.set_pointer(path, name, target.clone()),
            Change::Remove => tree.del_pointer(path, name),
        }
        .map_err(MergeError::from)?;
    }
    for (name, change) in &entry.registry {
        match change {
            Change::Set(value) => tree.set_registry(path, name, value.clone()),
            Change::Remove => tree.del_registry(path, name),
        }
        .map_err(MergeError::from)?;
    }
    for (name, delta) in &entry.sets {
        for member in &delta.removed {
            tree.del_set_member(path, name, member)
                .map_err(MergeError::from)?;
        }
        for (member, data) in &delta.added {
            tree.put_set_member(path, name, member, data.clone())
                .map_err(MergeError::from)?;
        }
    }
    if let Some(rules) = &entry.meta {
        tree.replace_meta(path, rules.clone())
            .map_err(MergeError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::generate_tree_diff;
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

    async fn checkpoint(tree: &mut Tree, store: &Arc<ObjectStore>) -> Tree {
        let result = tree.persist().unwrap();
        for record in result.objects.into_values() {
            store.insert(record).unwrap();
        }
        let mut copy = Tree::open(Arc::clone(store), result.root_hash)
            .await
            .unwrap();
        copy.load_subtree(&NodePath::root()).await.unwrap();
        copy
    }

    /// Applying a generated diff to a fresh copy of the ancestor reproduces
    /// the derived tree's observable state.
    #[tokio::test]
    async fn generated_diff_replays_faithfully() {
        let store = fresh_store();
        let root = NodePath::root();
        let mut work = Tree::new(Arc::clone(&store));
        let container = work.create_node(&root, Some(root.clone()), None).unwrap();
        let node = work.create_node(&root, Some(root.clone()), None).unwrap();
        work.set_attribute(&node, "name", json!("original")).unwrap();
        let ancestor = checkpoint(&mut work, &store).await;

        let mut derived = checkpoint(
            &mut Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
                .await
                .unwrap(),
            &store,
        )
        .await;
        let moved = derived.move_node(&node, &container).unwrap();
        derived.set_attribute(&moved, "name", json!("renamed")).unwrap();
        let fresh = derived
            .create_node(&container, Some(root.clone()), None)
            .unwrap();
        derived.set_pointer(&fresh, "sibling", Some(moved.clone())).unwrap();

        let diff = generate_tree_diff(&ancestor, &derived, "s1").unwrap();

        let mut replay = Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
            .await
            .unwrap();
        replay.load_subtree(&root).await.unwrap();
        apply_tree_diff(&mut replay, &diff).unwrap();

        assert_eq!(
            replay.attribute(&moved, "name").unwrap(),
            Some(&json!("renamed"))
        );
        assert_eq!(
            replay.pointer(&fresh, "sibling").unwrap(),
            Some(Some(moved.clone()))
        );
        assert!(!replay.is_loaded(&node));
        assert_eq!(
            replay.node(&moved).unwrap().data.guid,
            derived.node(&moved).unwrap().data.guid
        );
    }

    #[tokio::test]
    async fn deletions_run_before_structure_and_properties() {
        let store = fresh_store();
        let root = NodePath::root();
        let mut work = Tree::new(Arc::clone(&store));
        let doomed = work.create_node(&root, Some(root.clone()), None).unwrap();
        work.create_node(&doomed, Some(root.clone()), None).unwrap();
        let ancestor = checkpoint(&mut work, &store).await;

        let mut derived = checkpoint(
            &mut Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
                .await
                .unwrap(),
            &store,
        )
        .await;
        derived.delete_node(&doomed).unwrap();
        // Reuses the freed relid for a brand-new node.
        let replacement = derived.create_node(&root, Some(root.clone()), None).unwrap();
        assert_eq!(replacement, doomed);
        derived.set_attribute(&replacement, "fresh", json!(true)).unwrap();

        let diff = generate_tree_diff(&ancestor, &derived, "s1").unwrap();

        let mut replay = Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
            .await
            .unwrap();
        replay.load_subtree(&root).await.unwrap();
        apply_tree_diff(&mut replay, &diff).unwrap();

        assert_eq!(
            replay.node(&replacement).unwrap().data.guid,
            derived.node(&replacement).unwrap().data.guid
        );
        assert_eq!(
            replay.attribute(&replacement, "fresh").unwrap(),
            Some(&json!(true))
        );
        assert!(replay.children(&replacement).unwrap().is_empty());
    }

    /// A node rescued out of a subtree that the same diff deletes must be
    /// moved before the deletion runs.
    #[tokio::test]
    async fn move_out_survives_deletion_of_its_container() {
        let store = fresh_store();
        let root = NodePath::root();
        let mut work = Tree::new(Arc::clone(&store));
        let container = work.create_node(&root, Some(root.clone()), None).unwrap();
        let rescued = work.create_node(&container, Some(root.clone()), None).unwrap();
        work.set_attribute(&rescued, "keep", json!(true)).unwrap();
        let haven = work.create_node(&root, Some(root.clone()), None).unwrap();
        let ancestor = checkpoint(&mut work, &store).await;

        let mut derived = checkpoint(
            &mut Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
                .await
                .unwrap(),
            &store,
        )
        .await;
        let landed = derived.move_node(&rescued, &haven).unwrap();
        derived.delete_node(&container).unwrap();

        let diff = generate_tree_diff(&ancestor, &derived, "s1").unwrap();

        let mut replay = Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
            .await
            .unwrap();
        replay.load_subtree(&root).await.unwrap();
        apply_tree_diff(&mut replay, &diff).unwrap();

        assert!(!replay.is_loaded(&container));
        assert_eq!(replay.attribute(&landed, "keep").unwrap(), Some(&json!(true)));
        assert_eq!(
            replay.node(&landed).unwrap().data.guid,
            derived.node(&landed).unwrap().data.guid
        );
    }

    /// Two siblings that swapped relids form a move cycle; the replay parks
    /// one aside and still converges on the derived shape.
    #[tokio::test]
    async fn sibling_relid_swap_replays() {
        let store = fresh_store();
        let root = NodePath::root();
        let relid = |s: &str| Relid::new(s).unwrap();
        let mut work = Tree::new(Arc::clone(&store));
        let first = work
            .create_node(&root, Some(root.clone()), Some(relid("a")))
            .unwrap();
        work.set_attribute(&first, "tag", json!("one")).unwrap();
        let second = work
            .create_node(&root, Some(root.clone()), Some(relid("b")))
            .unwrap();
        work.set_attribute(&second, "tag", json!("two")).unwrap();
        let ancestor = checkpoint(&mut work, &store).await;

        let mut derived = checkpoint(
            &mut Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
                .await
                .unwrap(),
            &store,
        )
        .await;
        let parked = derived
            .move_node_as(&first, &root, Some(relid("tmp")))
            .unwrap();
        derived.move_node_as(&second, &root, Some(relid("a"))).unwrap();
        derived.move_node_as(&parked, &root, Some(relid("b"))).unwrap();

        let diff = generate_tree_diff(&ancestor, &derived, "s1").unwrap();
        assert_eq!(diff.entries[&first].moved_from, Some(second.clone()));
        assert_eq!(diff.entries[&second].moved_from, Some(first.clone()));

        let mut replay = Tree::open(Arc::clone(&store), ancestor.root_hash().unwrap())
            .await
            .unwrap();
        replay.load_subtree(&root).await.unwrap();
        apply_tree_diff(&mut replay, &diff).unwrap();

        assert_eq!(replay.children(&root).unwrap().len(), 2);
        assert_eq!(replay.attribute(&first, "tag").unwrap(), Some(&json!("two")));
        assert_eq!(replay.attribute(&second, "tag").unwrap(), Some(&json!("one")));
        assert_eq!(
            replay.node(&first).unwrap().data.guid,
            derived.node(&first).unwrap().data.guid
        );
    }

    /// A created node whose relid clashes with a sibling the diff never
    /// removes lands on an extended guid-derived relid instead of failing.
    #[tokio::test]
    async fn blocked_creation_extends_its_relid() {
        let store = fresh_store();
        let root = NodePath::root();
        let relid = |s: &str| Relid::new(s).unwrap();
        let mut work = Tree::new(Arc::clone(&store));
        let parent = work.create_node(&root, Some(root.clone()), None).unwrap();
        work.create_node(&parent, Some(root.clone()), Some(relid("taken")))
            .unwrap();

        let guid = Uuid::from_u128(0xfeed_face_cafe_beef);
        let mut data = trellis_store::NodeData::new(relid("taken"), Some(root.clone()));
        data.guid = guid;
        let mut diff = TreeDiff::new("s1");
        diff.entries.insert(
            parent.child(relid("taken")),
            NodeDiff {
                created: Some(data),
                ..NodeDiff::default()
            },
        );

        apply_tree_diff(&mut work, &diff).unwrap();

        let children = work.children(&parent).unwrap();
        assert_eq!(children.len(), 2);
        let landed = children
            .iter()
            .find(|c| work.node(c).unwrap().data.guid == guid)
            .unwrap();
        assert!(guid
            .simple()
            .to_string()
            .starts_with(landed.relid().unwrap().as_str()));
    }
}
