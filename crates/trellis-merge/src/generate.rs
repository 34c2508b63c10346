//! Diff generation
//!
//! Compares a derived working copy against its ancestor, matching nodes by
//! guid so a move shows up as a move and not a delete/create pair. Both
//! trees are compared over their loaded nodes; callers diffing a whole
//! snapshot load the relevant subtrees first.

use crate::diff::{Change, NodeDiff, SetDiff, TreeDiff};
use crate::error::MergeError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use trellis_store::{NodeData, NodePath};
use trellis_tree::Tree;
use uuid::Uuid;

/// Structural diff of `derived` against `ancestor`
///
/// `origin` identifies the session that produced the diff; concatenation
/// tie-breaks relid collisions on it, so concurrent sessions must use
/// distinct origins.
///
/// # Errors
/// Propagates working-copy access failures.
pub fn generate_tree_diff(
    ancestor: &Tree,
    derived: &Tree,
    origin: impl Into<String>,
) -> Result<TreeDiff, MergeError> {
    let ancestor_paths = sorted_paths(ancestor);
    let derived_paths = sorted_paths(derived);
    let ancestor_by_guid = guid_index(ancestor, &ancestor_paths)?;
    let derived_by_guid = guid_index(derived, &derived_paths)?;

    let mut diff = TreeDiff::new(origin);

    // Deletions: ancestor nodes whose guid vanished. Only the topmost node
    // of each deleted subtree gets an entry; application removes the
    // subtree recursively.
    for path in &ancestor_paths {
        if path.is_root() {
            continue;
        }
        let guid = ancestor.node(path).map_err(MergeError::from)?.data.guid;
        if derived_by_guid.contains_key(&guid) {
            continue;
        }
        let parent = path.parent().unwrap_or_else(NodePath::root);
        let parent_guid = ancestor.node(&parent).map_err(MergeError::from)?.data.guid;
        if parent.is_root() || derived_by_guid.contains_key(&parent_guid) {
            diff.entries.entry(path.clone()).or_default().deleted = true;
        }
    }

    for path in &derived_paths {
        if path.is_root() {
            let root = &derived.node(path).map_err(MergeError::from)?.data;
            let ancestor_root = &ancestor
                .node(&NodePath::root())
                .map_err(MergeError::from)?
                .data;
            let entry = diff_properties(ancestor_root, root);
            if !entry.is_empty() {
                diff.entries.insert(path.clone(), entry);
            }
            continue;
        }
        let data = &derived.node(path).map_err(MergeError::from)?.data;
        match ancestor_by_guid.get(&data.guid) {
            None => {
                // Created node; full own data travels in the entry.
                let entry = diff.entries.entry(path.clone()).or_default();
                entry.created = Some(data.clone());
            }
            Some(old_path) => {
                let old_data = &ancestor.node(old_path).map_err(MergeError::from)?.data;
                let mut entry = diff_properties(old_data, data);

                // The node itself moved when its parent changed identity or
                // its relid changed; a path shift caused purely by an
                // ancestor's move is not a move of this node.
                let old_parent = old_path.parent().unwrap_or_else(NodePath::root);
                let new_parent = path.parent().unwrap_or_else(NodePath::root);
                let old_parent_guid =
                    ancestor.node(&old_parent).map_err(MergeError::from)?.data.guid;
                let new_parent_guid =
                    derived.node(&new_parent).map_err(MergeError::from)?.data.guid;
                if old_parent_guid != new_parent_guid || old_data.relid != data.relid {
                    entry.moved_from = Some(old_path.clone());
                }

                if !entry.is_empty() {
                    // The path may already carry a delete entry for its
                    // previous occupant; keep that flag.
                    let slot = diff.entries.entry(path.clone()).or_default();
                    entry.deleted = slot.deleted;
                    *slot = entry;
                }
            }
        }
    }

    tracing::debug!(
        origin = %diff.origin,
        entries = diff.entries.len(),
        "generated tree diff"
    );
    Ok(diff)
}

fn sorted_paths(tree: &Tree) -> Vec<NodePath> {
    let mut paths: Vec<NodePath> = tree.loaded_paths().cloned().collect();
    paths.sort();
    paths
}

fn guid_index(
    tree: &Tree,
    paths: &[NodePath],
) -> Result<HashMap<Uuid, NodePath>, MergeError> {
    let mut index = HashMap::with_capacity(paths.len());
    for path in paths {
        let guid = tree.node(path).map_err(MergeError::from)?.data.guid;
        index.insert(guid, path.clone());
    }
    Ok(index)
}

/// Key-wise property delta between two own-data snapshots of one node
fn diff_properties(old: &NodeData, new: &NodeData) -> NodeDiff {
    let mut entry = NodeDiff::default();

    entry.attributes = diff_value_map(&old.attributes, &new.attributes);
    entry.registry = diff_value_map(&old.registry, &new.registry);

    for (name, target) in &new.pointers {
        if old.pointers.get(name) != Some(target) {
            entry
                .pointers
                .insert(name.clone(), Change::Set(target.clone()));
        }
    }
    for name in old.pointers.keys() {
        if !new.pointers.contains_key(name) {
            entry.pointers.insert(name.clone(), Change::Remove);
        }
    }

    let set_names: BTreeSet<&String> = old.sets.keys().chain(new.sets.keys()).collect();
    for name in set_names {
        let mut delta = SetDiff::default();
        let old_members = old.sets.get(name);
        let new_members = new.sets.get(name);
        if let Some(new_set) = new_members {
            for (member, data) in &new_set.members {
                let unchanged = old_members
                    .and_then(|s| s.members.get(member))
                    .is_some_and(|old_data| old_data == data);
                if !unchanged {
                    delta.added.insert(member.clone(), data.clone());
                }
            }
        }
        if let Some(old_set) = old_members {
            for member in old_set.members.keys() {
                let still_there = new_members.is_some_and(|s| s.members.contains_key(member));
                if !still_there {
                    delta.removed.insert(member.clone());
                }
            }
        }
        if !delta.is_empty() {
            entry.sets.insert(name.clone(), delta);
        }
    }

    if old.base != new.base {
        entry.base = Some(Change::Set(new.base.clone()));
    }
    if old.meta != new.meta {
        entry.meta = Some(new.meta.clone());
    }
    entry
}

fn diff_value_map(
    old: &BTreeMap<String, serde_json::Value>,
    new: &BTreeMap<String, serde_json::Value>,
) -> BTreeMap<String, Change<serde_json::Value>> {
    let mut out = BTreeMap::new();
    for (name, value) in new {
        if old.get(name) != Some(value) {
            out.insert(name.clone(), Change::Set(value.clone()));
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            out.insert(name.clone(), Change::Remove);
        }
    }
    out
}
