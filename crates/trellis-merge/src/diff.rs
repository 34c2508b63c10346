//! Diff structures
//!
//! A [`TreeDiff`] is keyed by node path in the *derived* snapshot's
//! coordinates; each [`NodeDiff`] describes one node's delta against the
//! shared ancestor. The structures serialize to JSON so they can travel to
//! an external branch-synchronization layer as the `{merge, items}`
//! payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use trellis_store::{MemberData, MetaRules, NodeData, NodePath};

/// A single property delta: assign a new value or remove the own value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Change<T> {
    /// Assign the property to this value
    Set(T),
    /// Remove the own value (inherited value becomes visible again)
    Remove,
}

/// Delta of one named set's own membership
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetDiff {
    /// Members added or whose membership data changed
    #[serde(default)]
    pub added: BTreeMap<NodePath, MemberData>,

    /// Members removed from the own set
    #[serde(default)]
    pub removed: BTreeSet<NodePath>,
}

impl SetDiff {
    /// Whether the delta changes no membership
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Node-level delta between two snapshots relative to a shared ancestor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeDiff {
    /// The node was created; carries its full own data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<NodeData>,

    /// The node (and its subtree) was deleted
    #[serde(default)]
    pub deleted: bool,

    /// The node was moved here; its path in the ancestor snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<NodePath>,

    /// Inheritance base reassignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Change<Option<NodePath>>>,

    /// Own attribute changes, keyed by name
    #[serde(default)]
    pub attributes: BTreeMap<String, Change<Value>>,

    /// Own pointer changes; `Set(None)` is an explicit null
    #[serde(default)]
    pub pointers: BTreeMap<String, Change<Option<NodePath>>>,

    /// Own registry changes
    #[serde(default)]
    pub registry: BTreeMap<String, Change<Value>>,

    /// Own set membership changes, keyed by set name
    #[serde(default)]
    pub sets: BTreeMap<String, SetDiff>,

    /// Wholesale replacement of the node's own meta rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaRules>,
}

impl NodeDiff {
    /// Whether the entry carries no information
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_none()
            && !self.deleted
            && self.moved_from.is_none()
            && self.base.is_none()
            && self.attributes.is_empty()
            && self.pointers.is_empty()
            && self.registry.is_empty()
            && self.sets.values().all(SetDiff::is_empty)
            && self.meta.is_none()
    }

    /// Whether the entry changes anything besides (possibly) being a delete
    #[must_use]
    pub fn modifies(&self) -> bool {
        self.created.is_some()
            || self.moved_from.is_some()
            || self.base.is_some()
            || !self.attributes.is_empty()
            || !self.pointers.is_empty()
            || !self.registry.is_empty()
            || self.sets.values().any(|s| !s.is_empty())
            || self.meta.is_some()
    }

    /// Rewrite every path reference inside the entry that falls under
    /// `from` onto `to`; returns whether anything changed
    pub(crate) fn rebase_references(&mut self, from: &NodePath, to: &NodePath) -> bool {
        let mut changed = false;
        if let Some(data) = &mut self.created {
            changed |= rebase_data_references(data, from, to);
        }
        if let Some(Change::Set(Some(base))) = &mut self.base {
            if let Some(rebased) = base.rebase(from, to) {
                *base = rebased;
                changed = true;
            }
        }
        for change in self.pointers.values_mut() {
            if let Change::Set(Some(target)) = change {
                if let Some(rebased) = target.rebase(from, to) {
                    *target = rebased;
                    changed = true;
                }
            }
        }
        for set in self.sets.values_mut() {
            if set.added.keys().any(|m| from.is_prefix_of(m)) {
                let added = std::mem::take(&mut set.added);
                for (member, data) in added {
                    let member = member.rebase(from, to).unwrap_or(member);
                    set.added.insert(member, data);
                }
                changed = true;
            }
            if set.removed.iter().any(|m| from.is_prefix_of(m)) {
                let removed = std::mem::take(&mut set.removed);
                for member in removed {
                    let member = member.rebase(from, to).unwrap_or(member);
                    set.removed.insert(member);
                }
                changed = true;
            }
        }
        if let Some(rules) = &mut self.meta {
            changed |= rebase_rule_references(rules, from, to);
        }
        changed
    }
}

fn rebase_data_references(data: &mut NodeData, from: &NodePath, to: &NodePath) -> bool {
    let mut changed = false;
    if let Some(base) = &mut data.base {
        if let Some(rebased) = base.rebase(from, to) {
            *base = rebased;
            changed = true;
        }
    }
    for target in data.pointers.values_mut().flatten() {
        if let Some(rebased) = target.rebase(from, to) {
            *target = rebased;
            changed = true;
        }
    }
    for set in data.sets.values_mut() {
        if set.members.keys().any(|m| from.is_prefix_of(m)) {
            let members = std::mem::take(&mut set.members);
            for (member, member_data) in members {
                let member = member.rebase(from, to).unwrap_or(member);
                set.members.insert(member, member_data);
            }
            changed = true;
        }
    }
    changed |= rebase_rule_references(&mut data.meta, from, to);
    changed
}

fn rebase_rule_references(rules: &mut MetaRules, from: &NodePath, to: &NodePath) -> bool {
    let mut changed = false;
    for rule in &mut rules.children {
        if let Some(rebased) = rule.target.rebase(from, to) {
            rule.target = rebased;
            changed = true;
        }
    }
    for rule in rules.pointers.values_mut() {
        for target in &mut rule.targets {
            if let Some(rebased) = target.rebase(from, to) {
                *target = rebased;
                changed = true;
            }
        }
    }
    for targets in rules.aspects.values_mut() {
        for target in targets {
            if let Some(rebased) = target.rebase(from, to) {
                *target = rebased;
                changed = true;
            }
        }
    }
    changed
}

/// A structural diff: one entry per changed node, keyed by derived path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDiff {
    /// Stable identifier of the session/branch that produced this diff;
    /// collision resolution tie-breaks on it, so peers must use distinct
    /// origins
    pub origin: String,

    /// Per-node deltas
    #[serde(default)]
    pub entries: BTreeMap<NodePath, NodeDiff>,
}

impl TreeDiff {
    /// An empty diff for the given origin
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Whether the diff changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(NodeDiff::is_empty)
    }

    /// Relocate every entry keyed under `from` onto `to` and rewrite all
    /// internal path references accordingly
    pub(crate) fn rebase_subtree(&mut self, from: &NodePath, to: &NodePath) {
        let moved_keys: Vec<NodePath> = self
            .entries
            .keys()
            .filter(|key| from.is_prefix_of(key))
            .cloned()
            .collect();
        let mut relocated = Vec::with_capacity(moved_keys.len());
        for key in moved_keys {
            if let Some(entry) = self.entries.remove(&key) {
                let rebased = key.rebase(from, to).unwrap_or(key);
                relocated.push((rebased, entry));
            }
        }
        for (key, entry) in relocated {
            self.entries.insert(key, entry);
        }
        for entry in self.entries.values_mut() {
            entry.rebase_references(from, to);
        }
    }
}

/// A pair of diff entries touching the same path and property in
/// structurally incompatible ways
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictItem {
    /// Path both sides touched
    pub path: NodePath,

    /// Which aspect of the node disagrees (`node`, `move`, `base`, `meta`,
    /// `attribute:<name>`, `pointer:<name>`, `registry:<name>`,
    /// `set:<name>:<member>`)
    pub property: String,

    /// First diff's entry at the path
    pub mine: NodeDiff,

    /// Second diff's entry at the conflicting path
    pub theirs: NodeDiff,
}

/// Outcome of concatenating two diffs
///
/// An empty `items` signals a clean, applicable merge; a non-empty `items`
/// means the caller must surface a resolution choice or abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// The unioned change-set with conflicting entries withheld
    pub merge: TreeDiff,

    /// Genuine conflicts, left for external resolution
    pub items: Vec<ConflictItem>,
}
