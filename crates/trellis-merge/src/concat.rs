//! Diff concatenation
//!
//! Combines two independently generated diffs over the same ancestor into
//! one change-set. Three situations arise at a shared path:
//!
//! - both sides claim the same child slot, at least one by creating a node
//!   there: a *collision*, resolved by displacing one creation to a fresh,
//!   guid-derived relid. Between two creations the displaced side depends
//!   only on diff origins (and, for equal origins, on the created guids);
//!   against a move the creation always yields, since the moved node's
//!   identity predates the merge. Never depends on argument order.
//! - one side deletes what the other modifies, adds under, or moves out
//!   of; or both move the same node to different places; or both move
//!   different nodes onto the same slot; or both set the same property to
//!   different values: a *conflict*, reported and withheld from the merge.
//! - anything else: unioned, identical changes applied once.

use crate::diff::{Change, ConflictItem, MergeResult, NodeDiff, TreeDiff};
use crate::error::MergeError;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use trellis_store::{NodePath, Relid};
use uuid::Uuid;

/// Merge two diffs into a single change-set plus conflict items
///
/// Both argument orders produce isomorphic merges; colliding creations may
/// end up at different literal relids, but the resulting tree shapes match.
///
/// # Errors
/// Fails only on malformed diff entries (e.g. a creation keyed at the
/// root); genuine merge conflicts are data, not errors.
pub fn try_to_concat_changes(a: &TreeDiff, b: &TreeDiff) -> Result<MergeResult, MergeError> {
    let mut left = a.clone();
    let mut right = b.clone();
    let mut items = Vec::new();

    resolve_relid_collisions(&mut left, &mut right)?;
    detect_structural_conflicts(&mut left, &mut right, &mut items);
    detect_property_conflicts(&mut left, &mut right, &mut items);

    let merge = union(left, right);
    tracing::debug!(
        entries = merge.entries.len(),
        conflicts = items.len(),
        "concatenated diffs"
    );
    Ok(MergeResult { merge, items })
}

// ----------------------------------------------------------------------
// Relid collisions
// ----------------------------------------------------------------------

/// How two entries contest one child slot; the loser is always a creation
enum SlotContest {
    /// Both sides created different nodes at the slot
    Creations,
    /// One side created, the other moved an existing node onto the slot
    CreateVersusMove { created_left: bool },
}

fn slot_contest(mine: &NodeDiff, theirs: &NodeDiff) -> Option<SlotContest> {
    match (&mine.created, &theirs.created) {
        (Some(l), Some(r)) if l.guid != r.guid => Some(SlotContest::Creations),
        (Some(_), None) if theirs.moved_from.is_some() => {
            Some(SlotContest::CreateVersusMove { created_left: true })
        }
        (None, Some(_)) if mine.moved_from.is_some() => {
            Some(SlotContest::CreateVersusMove { created_left: false })
        }
        _ => None,
    }
}

fn resolve_relid_collisions(left: &mut TreeDiff, right: &mut TreeDiff) -> Result<(), MergeError> {
    // Shallowest first; displacing a parent rewrites its descendants' keys,
    // which may clear deeper collisions before they are examined.
    loop {
        let mut collisions: Vec<(NodePath, SlotContest)> = left
            .entries
            .iter()
            .filter_map(|(path, entry)| {
                let theirs = right.entries.get(path)?;
                slot_contest(entry, theirs).map(|contest| (path.clone(), contest))
            })
            .collect();
        collisions.sort_by_key(|(p, _)| (p.depth(), p.clone()));
        let Some((path, contest)) = collisions.into_iter().next() else {
            return Ok(());
        };

        let displace_left = match contest {
            // The creation yields to the move: the moved node existed in
            // the ancestor and keeps its slot.
            SlotContest::CreateVersusMove { created_left } => created_left,
            SlotContest::Creations => {
                let left_guid = created_guid(left, &path)?;
                let right_guid = created_guid(right, &path)?;
                match left.origin.cmp(&right.origin) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => left_guid > right_guid,
                }
            }
        };
        let displaced_guid = created_guid(if displace_left { left } else { right }, &path)?;

        let parent = path.parent().ok_or_else(|| MergeError::MalformedEntry {
            path: path.to_string(),
            reason: "created entry keyed at the root",
        })?;
        let relid = fresh_relid(&parent, &path, &displaced_guid, left, right)?;
        let new_path = parent.child(relid.clone());
        let displaced_origin = if displace_left {
            &left.origin
        } else {
            &right.origin
        };
        tracing::debug!(
            collision = %path,
            displaced = %new_path,
            origin = %displaced_origin,
            "resolved relid collision"
        );

        let target = if displace_left { &mut *left } else { &mut *right };
        // A combined delete-then-create entry only relocates its creation;
        // the delete of the slot's previous occupant stays put.
        let mut keep_delete = false;
        if let Some(entry) = target.entries.get_mut(&path) {
            if let Some(data) = entry.created.as_mut() {
                data.relid = relid;
            }
            keep_delete = std::mem::take(&mut entry.deleted);
        }
        target.rebase_subtree(&path, &new_path);
        if keep_delete {
            target.entries.entry(path.clone()).or_default().deleted = true;
        }
    }
}

fn created_guid(diff: &TreeDiff, path: &NodePath) -> Result<Uuid, MergeError> {
    diff.entries
        .get(path)
        .and_then(|entry| entry.created.as_ref())
        .map(|data| data.guid)
        .ok_or_else(|| MergeError::MalformedEntry {
            path: path.to_string(),
            reason: "collision path lost its created entry",
        })
}

/// Deterministic replacement relid derived from the displaced node's guid;
/// extended with further hex digits until it clashes with nothing either
/// diff knows about under the parent
fn fresh_relid(
    parent: &NodePath,
    taken: &NodePath,
    guid: &Uuid,
    left: &TreeDiff,
    right: &TreeDiff,
) -> Result<Relid, MergeError> {
    let hex = guid.simple().to_string();
    for len in 8..=hex.len() {
        let relid = Relid::new(&hex[..len])?;
        let candidate = parent.child(relid.clone());
        if candidate != *taken
            && !left.entries.contains_key(&candidate)
            && !right.entries.contains_key(&candidate)
        {
            return Ok(relid);
        }
    }
    Err(MergeError::MalformedEntry {
        path: taken.to_string(),
        reason: "no free guid-derived relid under parent",
    })
}

// ----------------------------------------------------------------------
// Structural conflicts
// ----------------------------------------------------------------------

fn detect_structural_conflicts(
    left: &mut TreeDiff,
    right: &mut TreeDiff,
    items: &mut Vec<ConflictItem>,
) {
    // (delete path in `mine`, touched path in `theirs`) pairs, collected
    // from both directions before anything is removed.
    let forward = delete_pairs(left, right);
    let backward = delete_pairs(right, left);
    let moves = divergent_moves(left, right);
    let contested = contested_move_targets(left, right);

    let mut drop_left: BTreeSet<NodePath> = BTreeSet::new();
    let mut drop_right: BTreeSet<NodePath> = BTreeSet::new();

    for (deleted, touched) in forward {
        items.push(ConflictItem {
            path: deleted.clone(),
            property: "node".into(),
            mine: left.entries[&deleted].clone(),
            theirs: right.entries[&touched].clone(),
        });
        drop_left.insert(deleted);
        drop_right.insert(touched);
    }
    for (deleted, touched) in backward {
        items.push(ConflictItem {
            path: deleted.clone(),
            property: "node".into(),
            mine: left.entries[&touched].clone(),
            theirs: right.entries[&deleted].clone(),
        });
        drop_right.insert(deleted);
        drop_left.insert(touched);
    }
    for (left_key, right_key) in moves {
        items.push(ConflictItem {
            path: left_key.clone(),
            property: "move".into(),
            mine: left.entries[&left_key].clone(),
            theirs: right.entries[&right_key].clone(),
        });
        drop_left.insert(left_key);
        drop_right.insert(right_key);
    }
    for path in contested {
        items.push(ConflictItem {
            path: path.clone(),
            property: "move".into(),
            mine: left.entries[&path].clone(),
            theirs: right.entries[&path].clone(),
        });
        drop_left.insert(path.clone());
        drop_right.insert(path);
    }

    for path in drop_left {
        left.entries.remove(&path);
    }
    for path in drop_right {
        right.entries.remove(&path);
    }
}

/// Paths `theirs` touches inside (or moves out of) subtrees `mine` deletes
fn delete_pairs(mine: &TreeDiff, theirs: &TreeDiff) -> Vec<(NodePath, NodePath)> {
    let mut pairs = Vec::new();
    for (deleted, entry) in &mine.entries {
        if !entry.deleted {
            continue;
        }
        for (touched, other) in &theirs.entries {
            let inside = deleted.is_prefix_of(touched) && other.modifies();
            let moved_out = other
                .moved_from
                .as_ref()
                .is_some_and(|src| deleted.is_prefix_of(src))
                && !deleted.is_prefix_of(touched);
            if inside || moved_out {
                pairs.push((deleted.clone(), touched.clone()));
            }
        }
    }
    pairs
}

/// Different nodes moved onto the same slot by the two sides
///
/// Collision resolution never displaces a moved node (its relid is part of
/// an identity that predates the merge), so two moves wanting one slot are
/// a conflict rather than a displacement.
fn contested_move_targets(left: &TreeDiff, right: &TreeDiff) -> Vec<NodePath> {
    left.entries
        .iter()
        .filter_map(|(path, entry)| {
            let mine = entry.moved_from.as_ref()?;
            let theirs = right.entries.get(path)?.moved_from.as_ref()?;
            (mine != theirs).then(|| path.clone())
        })
        .collect()
}

/// Same source node moved to different destinations by the two sides
fn divergent_moves(left: &TreeDiff, right: &TreeDiff) -> Vec<(NodePath, NodePath)> {
    let right_by_source: HashMap<&NodePath, &NodePath> = right
        .entries
        .iter()
        .filter_map(|(key, entry)| entry.moved_from.as_ref().map(|src| (src, key)))
        .collect();
    let mut out = Vec::new();
    for (left_key, entry) in &left.entries {
        let Some(source) = &entry.moved_from else {
            continue;
        };
        if let Some(right_key) = right_by_source.get(source) {
            if *right_key != left_key {
                out.push((left_key.clone(), (*right_key).clone()));
            }
        }
    }
    out
}

// ----------------------------------------------------------------------
// Property conflicts
// ----------------------------------------------------------------------

fn detect_property_conflicts(
    left: &mut TreeDiff,
    right: &mut TreeDiff,
    items: &mut Vec<ConflictItem>,
) {
    let shared: Vec<NodePath> = left
        .entries
        .keys()
        .filter(|path| right.entries.contains_key(*path))
        .cloned()
        .collect();

    for path in shared {
        let mine = left.entries[&path].clone();
        let theirs = right.entries[&path].clone();

        // Same-guid creations with diverging payloads cannot be reconciled
        // field by field; the whole node is in question.
        if let (Some(l), Some(r)) = (&mine.created, &theirs.created) {
            if l.guid == r.guid && l != r {
                items.push(ConflictItem {
                    path: path.clone(),
                    property: "node".into(),
                    mine: mine.clone(),
                    theirs: theirs.clone(),
                });
                left.entries.remove(&path);
                right.entries.remove(&path);
                continue;
            }
        }

        let mut conflicting: Vec<String> = Vec::new();
        if both_differ(&mine.base, &theirs.base) {
            conflicting.push("base".into());
        }
        if both_differ(&mine.meta, &theirs.meta) {
            conflicting.push("meta".into());
        }
        conflicting.extend(map_conflicts("attribute", &mine.attributes, &theirs.attributes));
        conflicting.extend(map_conflicts("pointer", &mine.pointers, &theirs.pointers));
        conflicting.extend(map_conflicts("registry", &mine.registry, &theirs.registry));

        let mut set_conflicts: Vec<(String, NodePath)> = Vec::new();
        for (name, l) in &mine.sets {
            let Some(r) = theirs.sets.get(name) else {
                continue;
            };
            for (member, data) in &l.added {
                let disagree = r.added.get(member).is_some_and(|other| other != data)
                    || r.removed.contains(member);
                if disagree {
                    set_conflicts.push((name.clone(), member.clone()));
                }
            }
            for member in &l.removed {
                if r.added.contains_key(member) {
                    set_conflicts.push((name.clone(), member.clone()));
                }
            }
        }

        if conflicting.is_empty() && set_conflicts.is_empty() {
            continue;
        }
        for property in &conflicting {
            items.push(ConflictItem {
                path: path.clone(),
                property: property.clone(),
                mine: mine.clone(),
                theirs: theirs.clone(),
            });
        }
        for (name, member) in &set_conflicts {
            items.push(ConflictItem {
                path: path.clone(),
                property: format!("set:{name}:{member}"),
                mine: mine.clone(),
                theirs: theirs.clone(),
            });
        }

        for diff in [&mut *left, &mut *right] {
            let Some(entry) = diff.entries.get_mut(&path) else {
                continue;
            };
            for property in &conflicting {
                match property.as_str() {
                    "base" => entry.base = None,
                    "meta" => entry.meta = None,
                    scoped => match scoped.split_once(':') {
                        Some(("attribute", name)) => {
                            entry.attributes.remove(name);
                        }
                        Some(("pointer", name)) => {
                            entry.pointers.remove(name);
                        }
                        Some((_, name)) => {
                            entry.registry.remove(name);
                        }
                        None => {}
                    },
                }
            }
            for (name, member) in &set_conflicts {
                if let Some(set) = entry.sets.get_mut(name) {
                    set.added.remove(member);
                    set.removed.remove(member);
                }
            }
        }
    }
}

fn both_differ<T: PartialEq>(mine: &Option<T>, theirs: &Option<T>) -> bool {
    matches!((mine, theirs), (Some(l), Some(r)) if l != r)
}

fn map_conflicts<T: PartialEq>(
    kind: &str,
    mine: &BTreeMap<String, Change<T>>,
    theirs: &BTreeMap<String, Change<T>>,
) -> Vec<String> {
    mine.iter()
        .filter_map(|(name, change)| {
            let other = theirs.get(name)?;
            (change != other).then(|| format!("{kind}:{name}"))
        })
        .collect()
}

// ----------------------------------------------------------------------
// Union
// ----------------------------------------------------------------------

fn union(left: TreeDiff, right: TreeDiff) -> TreeDiff {
    let origin = if left.origin <= right.origin {
        format!("{}+{}", left.origin, right.origin)
    } else {
        format!("{}+{}", right.origin, left.origin)
    };
    let mut merge = TreeDiff::new(origin);
    merge.entries = left.entries;
    for (path, entry) in right.entries {
        match merge.entries.entry(path) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                merge_entry(slot.get_mut(), entry);
            }
        }
    }
    merge.entries.retain(|_, entry| !entry.is_empty());
    merge
}

fn merge_entry(dst: &mut NodeDiff, src: NodeDiff) {
    if dst.created.is_none() {
        dst.created = src.created;
    }
    dst.deleted |= src.deleted;
    if dst.moved_from.is_none() {
        dst.moved_from = src.moved_from;
    }
    if dst.base.is_none() {
        dst.base = src.base;
    }
    if dst.meta.is_none() {
        dst.meta = src.meta;
    }
    for (name, change) in src.attributes {
        dst.attributes.entry(name).or_insert(change);
    }
    for (name, change) in src.pointers {
        dst.pointers.entry(name).or_insert(change);
    }
    for (name, change) in src.registry {
        dst.registry.entry(name).or_insert(change);
    }
    for (name, delta) in src.sets {
        let slot = dst.sets.entry(name).or_default();
        for (member, data) in delta.added {
            slot.added.entry(member).or_insert(data);
        }
        slot.removed.extend(delta.removed);
    }
}
