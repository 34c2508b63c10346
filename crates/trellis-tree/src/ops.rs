//! Structural and property mutations
//!
//! Every mutation marks the touched node and its containment ancestors
//! dirty, so persistence can rehash exactly the affected spine. Mutations
//! that change the root's meta-element membership additionally bump the
//! tree's meta generation.

use crate::error::TreeError;
use crate::node::{ChildSlot, NodeEntry};
use crate::tree::{Tree, META_ASPECT_SET};
use serde_json::Value;
use trellis_store::{ChildRule, MemberData, MetaRules, NodeData, NodePath, PointerRule, Relid};

impl Tree {
    fn mark_dirty(&mut self, path: &NodePath) {
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if let Some(entry) = self.nodes.get_mut(&p) {
                entry.dirty = true;
            }
            current = p.parent();
        }
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Create a node under `parent`, inheriting from `base`
    ///
    /// Relid is assigned deterministically (smallest unused integer token)
    /// when not supplied.
    ///
    /// # Errors
    /// [`TreeError::InvalidBase`] if the base is unresolvable or would sit
    /// inside the new node; [`TreeError::RelidInUse`] for a taken relid.
    pub fn create_node(
        &mut self,
        parent: &NodePath,
        base: Option<NodePath>,
        relid: Option<Relid>,
    ) -> Result<NodePath, TreeError> {
        if let Some(base) = &base {
            if !self.is_loaded(base) {
                return Err(TreeError::InvalidBase {
                    node: parent.clone(),
                    base: base.clone(),
                });
            }
            // The chain above the base must be acyclic before we hang a new
            // node off it.
            self.base_chain(base)?;
        }
        let parent_entry = self.node(parent)?;
        let relid = match relid {
            Some(relid) => {
                if parent_entry.children.contains_key(&relid) {
                    return Err(TreeError::RelidInUse {
                        parent: parent.clone(),
                        relid,
                    });
                }
                relid
            }
            None => parent_entry.next_relid(),
        };

        let path = parent.child(relid.clone());
        let data = NodeData::new(relid.clone(), base);
        self.nodes.insert(path.clone(), NodeEntry::fresh(data));
        self.node_mut(parent)?
            .children
            .insert(relid, ChildSlot::Loaded);
        self.mark_dirty(&path);
        Ok(path)
    }

    /// Insert a node with fully specified own data (diff replay)
    ///
    /// Unlike [`create_node`](Self::create_node) the guid, relid and base
    /// come from the caller; used when replaying a merged diff, where the
    /// created node's identity must be preserved exactly.
    ///
    /// # Errors
    /// [`TreeError::RelidInUse`] if the relid is taken under `parent`.
    pub fn insert_node_data(
        &mut self,
        parent: &NodePath,
        data: NodeData,
    ) -> Result<NodePath, TreeError> {
        let relid = data.relid.clone();
        if self.node(parent)?.children.contains_key(&relid) {
            return Err(TreeError::RelidInUse {
                parent: parent.clone(),
                relid,
            });
        }
        let path = parent.child(relid.clone());
        self.nodes.insert(path.clone(), NodeEntry::fresh(data));
        self.node_mut(parent)?
            .children
            .insert(relid, ChildSlot::Loaded);
        self.mark_dirty(&path);
        if self.touches_meta_membership(&path) {
            self.bump_meta_generation();
        }
        Ok(path)
    }

    /// Delete a node and its contained subtree
    ///
    /// Memberships of deleted nodes in the root's tracked meta set are
    /// removed as well, keeping the meta index invalidation incremental.
    ///
    /// # Errors
    /// [`TreeError::RootOperation`] for the root; [`TreeError::NotLoaded`]
    /// if the node is not in the working copy.
    pub fn delete_node(&mut self, path: &NodePath) -> Result<(), TreeError> {
        if path.is_root() {
            return Err(TreeError::RootOperation);
        }
        self.node(path)?;
        let touches_meta = self.touches_meta_membership(path);

        self.nodes
            .retain(|candidate, _| !path.is_prefix_of(candidate));
        let parent = path.parent().unwrap_or_else(NodePath::root);
        if let Some(relid) = path.relid() {
            self.node_mut(&parent)?.children.remove(relid);
        }
        self.mark_dirty(&parent);

        if touches_meta {
            let root = NodePath::root();
            if let Some(set) = self.node_mut(&root)?.data.sets.get_mut(META_ASPECT_SET) {
                set.members.retain(|member, _| !path.is_prefix_of(member));
            }
            self.mark_dirty(&root);
            self.bump_meta_generation();
        }
        Ok(())
    }

    /// Move a node (and its subtree) under a new parent
    ///
    /// The relid is kept when free under the new parent, otherwise a fresh
    /// one is assigned. All references into the moved subtree held by loaded
    /// nodes (bases, pointers, set memberships, meta rule targets) are
    /// rewritten to the new location.
    ///
    /// # Errors
    /// [`TreeError::InvalidParent`] if the target is the node itself or one
    /// of its descendants.
    pub fn move_node(
        &mut self,
        path: &NodePath,
        new_parent: &NodePath,
    ) -> Result<NodePath, TreeError> {
        self.move_node_as(path, new_parent, None)
    }

    /// Move with an explicit relid under the new parent (diff replay)
    ///
    /// # Errors
    /// [`TreeError::RelidInUse`] if the requested relid is taken.
    pub fn move_node_as(
        &mut self,
        path: &NodePath,
        new_parent: &NodePath,
        requested: Option<Relid>,
    ) -> Result<NodePath, TreeError> {
        if path.is_root() {
            return Err(TreeError::RootOperation);
        }
        self.node(path)?;
        let new_parent_entry = self.node(new_parent)?;
        if path == new_parent || path.is_ancestor_of(new_parent) {
            return Err(TreeError::InvalidParent {
                node: path.clone(),
                parent: new_parent.clone(),
            });
        }

        let old_relid = path.relid().cloned().ok_or(TreeError::RootOperation)?;
        let relid = match requested {
            Some(relid) => {
                if new_parent_entry.children.contains_key(&relid) {
                    return Err(TreeError::RelidInUse {
                        parent: new_parent.clone(),
                        relid,
                    });
                }
                relid
            }
            None if new_parent_entry.children.contains_key(&old_relid) => {
                new_parent_entry.next_relid()
            }
            None => old_relid.clone(),
        };
        let new_path = new_parent.child(relid.clone());
        let touches_meta = self.touches_meta_membership(path);

        // Relocate the subtree's entries.
        let moved: Vec<(NodePath, NodeEntry)> = {
            let keys: Vec<NodePath> = self
                .nodes
                .keys()
                .filter(|candidate| path.is_prefix_of(candidate))
                .cloned()
                .collect();
            keys.into_iter()
                .map(|key| {
                    let entry = self.nodes.remove(&key).unwrap_or_else(|| unreachable!());
                    (key, entry)
                })
                .collect()
        };
        for (old_path, mut entry) in moved {
            let rebased = old_path
                .rebase(path, &new_path)
                .unwrap_or_else(|| new_path.clone());
            if old_path == *path {
                entry.data.relid = relid.clone();
                entry.dirty = true;
            }
            self.nodes.insert(rebased, entry);
        }

        let old_parent = path.parent().unwrap_or_else(NodePath::root);
        self.node_mut(&old_parent)?.children.remove(&old_relid);
        self.mark_dirty(&old_parent);
        self.node_mut(new_parent)?
            .children
            .insert(relid, ChildSlot::Loaded);
        self.mark_dirty(&new_path);

        self.rewrite_references(path, &new_path);
        if touches_meta {
            self.bump_meta_generation();
        }
        Ok(new_path)
    }

    /// Copy a node (and its fully loaded subtree) under a new parent
    ///
    /// Every copied node gets a fresh guid; references internal to the
    /// copied subtree are rebased onto the copy, references leaving it are
    /// kept as-is.
    ///
    /// # Errors
    /// [`TreeError::NotLoaded`] if any part of the subtree is unloaded.
    pub fn copy_node(
        &mut self,
        path: &NodePath,
        new_parent: &NodePath,
    ) -> Result<NodePath, TreeError> {
        if path.is_root() {
            return Err(TreeError::RootOperation);
        }
        if path.is_prefix_of(new_parent) {
            return Err(TreeError::InvalidParent {
                node: path.clone(),
                parent: new_parent.clone(),
            });
        }
        let subtree = self.collect_loaded_subtree(path)?;
        let parent_entry = self.node(new_parent)?;
        let old_relid = path.relid().cloned().ok_or(TreeError::RootOperation)?;
        let relid = if parent_entry.children.contains_key(&old_relid) {
            parent_entry.next_relid()
        } else {
            old_relid
        };
        let new_path = new_parent.child(relid.clone());

        for (old_path, entry) in subtree {
            let rebased = old_path
                .rebase(path, &new_path)
                .unwrap_or_else(|| new_path.clone());
            let mut copy = entry;
            copy.data.guid = uuid::Uuid::new_v4();
            copy.dirty = true;
            copy.persisted_hash = None;
            if old_path == *path {
                copy.data.relid = relid.clone();
            }
            rebase_node_references(&mut copy.data, path, &new_path);
            self.nodes.insert(rebased, copy);
        }
        self.node_mut(new_parent)?
            .children
            .insert(relid, ChildSlot::Loaded);
        self.mark_dirty(&new_path);
        Ok(new_path)
    }

    fn collect_loaded_subtree(
        &self,
        path: &NodePath,
    ) -> Result<Vec<(NodePath, NodeEntry)>, TreeError> {
        let mut out = Vec::new();
        let mut queue = vec![path.clone()];
        while let Some(current) = queue.pop() {
            let entry = self.node(&current)?;
            for (relid, slot) in &entry.children {
                let child = current.child(relid.clone());
                match slot {
                    ChildSlot::Loaded => queue.push(child),
                    ChildSlot::Unloaded(_) => return Err(TreeError::NotLoaded(child)),
                }
            }
            out.push((current.clone(), entry.clone()));
        }
        Ok(out)
    }

    /// Assign (or clear) a node's inheritance base
    ///
    /// # Errors
    /// [`TreeError::InvalidBase`] if the assignment would create an
    /// inheritance cycle; [`TreeError::RootOperation`] for the root, whose
    /// missing base is the anchor of the whole DAG.
    pub fn set_base(&mut self, path: &NodePath, base: Option<NodePath>) -> Result<(), TreeError> {
        if path.is_root() {
            return Err(TreeError::RootOperation);
        }
        if let Some(base) = &base {
            if base == path || !self.is_loaded(base) {
                return Err(TreeError::InvalidBase {
                    node: path.clone(),
                    base: base.clone(),
                });
            }
            for link in self.base_chain(base)? {
                if link == *path {
                    return Err(TreeError::InvalidBase {
                        node: path.clone(),
                        base: base.clone(),
                    });
                }
            }
        }
        self.node_mut(path)?.data.base = base;
        self.mark_dirty(path);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attributes / pointers / registry
    // ------------------------------------------------------------------

    /// Set an own attribute, shadowing any inherited value
    pub fn set_attribute(
        &mut self,
        path: &NodePath,
        name: &str,
        value: Value,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .attributes
            .insert(name.to_string(), value);
        self.mark_dirty(path);
        Ok(())
    }

    /// Remove an own attribute (the inherited value becomes visible again)
    pub fn del_attribute(&mut self, path: &NodePath, name: &str) -> Result<(), TreeError> {
        self.node_mut(path)?.data.attributes.remove(name);
        self.mark_dirty(path);
        Ok(())
    }

    /// Set an own pointer; `None` target explicitly nulls the pointer,
    /// shadowing any inherited target
    pub fn set_pointer(
        &mut self,
        path: &NodePath,
        name: &str,
        target: Option<NodePath>,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .pointers
            .insert(name.to_string(), target);
        self.mark_dirty(path);
        Ok(())
    }

    /// Remove an own pointer (the inherited target becomes visible again)
    pub fn del_pointer(&mut self, path: &NodePath, name: &str) -> Result<(), TreeError> {
        self.node_mut(path)?.data.pointers.remove(name);
        self.mark_dirty(path);
        Ok(())
    }

    /// Set an own registry entry, shadowing any inherited value
    pub fn set_registry(
        &mut self,
        path: &NodePath,
        name: &str,
        value: Value,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .registry
            .insert(name.to_string(), value);
        self.mark_dirty(path);
        Ok(())
    }

    /// Remove an own registry entry
    pub fn del_registry(&mut self, path: &NodePath, name: &str) -> Result<(), TreeError> {
        self.node_mut(path)?.data.registry.remove(name);
        self.mark_dirty(path);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sets
    // ------------------------------------------------------------------

    /// Add a member to an own set, creating the set if needed
    pub fn add_set_member(
        &mut self,
        path: &NodePath,
        set: &str,
        member: &NodePath,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .sets
            .entry(set.to_string())
            .or_default()
            .members
            .entry(member.clone())
            .or_default();
        self.mark_dirty(path);
        if path.is_root() && set == META_ASPECT_SET {
            self.bump_meta_generation();
        }
        Ok(())
    }

    /// Remove a member from an own set
    pub fn del_set_member(
        &mut self,
        path: &NodePath,
        set: &str,
        member: &NodePath,
    ) -> Result<(), TreeError> {
        if let Some(data) = self.node_mut(path)?.data.sets.get_mut(set) {
            data.members.shift_remove(member);
        }
        self.mark_dirty(path);
        if path.is_root() && set == META_ASPECT_SET {
            self.bump_meta_generation();
        }
        Ok(())
    }

    /// Remove an own set wholesale
    pub fn del_set(&mut self, path: &NodePath, set: &str) -> Result<(), TreeError> {
        self.node_mut(path)?.data.sets.remove(set);
        self.mark_dirty(path);
        if path.is_root() && set == META_ASPECT_SET {
            self.bump_meta_generation();
        }
        Ok(())
    }

    /// Set an attribute on one set membership, promoting an inherited
    /// membership into an own override if necessary
    pub fn set_member_attribute(
        &mut self,
        path: &NodePath,
        set: &str,
        member: &NodePath,
        name: &str,
        value: Value,
    ) -> Result<(), TreeError> {
        self.member_mut(path, set, member)?
            .attributes
            .insert(name.to_string(), value);
        self.mark_dirty(path);
        Ok(())
    }

    /// Set a registry entry on one set membership
    pub fn set_member_registry(
        &mut self,
        path: &NodePath,
        set: &str,
        member: &NodePath,
        name: &str,
        value: Value,
    ) -> Result<(), TreeError> {
        self.member_mut(path, set, member)?
            .registry
            .insert(name.to_string(), value);
        self.mark_dirty(path);
        Ok(())
    }

    /// Store membership data wholesale for one member (diff replay)
    pub fn put_set_member(
        &mut self,
        path: &NodePath,
        set: &str,
        member: &NodePath,
        data: MemberData,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .sets
            .entry(set.to_string())
            .or_default()
            .members
            .insert(member.clone(), data);
        self.mark_dirty(path);
        if path.is_root() && set == META_ASPECT_SET {
            self.bump_meta_generation();
        }
        Ok(())
    }

    fn member_mut(
        &mut self,
        path: &NodePath,
        set: &str,
        member: &NodePath,
    ) -> Result<&mut MemberData, TreeError> {
        Ok(self
            .node_mut(path)?
            .data
            .sets
            .entry(set.to_string())
            .or_default()
            .members
            .entry(member.clone())
            .or_default())
    }

    // ------------------------------------------------------------------
    // Meta rules
    // ------------------------------------------------------------------

    /// Allow `target` as a child type of `path`, with cardinality
    pub fn add_child_rule(
        &mut self,
        path: &NodePath,
        target: NodePath,
        min: i64,
        max: i64,
    ) -> Result<(), TreeError> {
        let rules = &mut self.node_mut(path)?.data.meta;
        rules.children.retain(|rule| rule.target != target);
        rules.children.push(ChildRule { target, min, max });
        self.mark_dirty(path);
        Ok(())
    }

    /// Define (or replace) the rule for a named pointer or set
    pub fn set_pointer_rule(
        &mut self,
        path: &NodePath,
        name: &str,
        rule: PointerRule,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .meta
            .pointers
            .insert(name.to_string(), rule);
        self.mark_dirty(path);
        Ok(())
    }

    /// Define (or replace) a named aspect's visible types
    pub fn set_aspect(
        &mut self,
        path: &NodePath,
        name: &str,
        targets: Vec<NodePath>,
    ) -> Result<(), TreeError> {
        self.node_mut(path)?
            .data
            .meta
            .aspects
            .insert(name.to_string(), targets);
        self.mark_dirty(path);
        Ok(())
    }

    /// Flag a type abstract (excluded from sensitive child queries)
    pub fn set_abstract(&mut self, path: &NodePath, is_abstract: bool) -> Result<(), TreeError> {
        self.node_mut(path)?.data.meta.is_abstract = is_abstract;
        self.mark_dirty(path);
        Ok(())
    }

    /// Replace a node's own meta rules wholesale (diff replay)
    pub fn replace_meta(&mut self, path: &NodePath, rules: MetaRules) -> Result<(), TreeError> {
        self.node_mut(path)?.data.meta = rules;
        self.mark_dirty(path);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reference rewriting on structural moves
    // ------------------------------------------------------------------

    fn rewrite_references(&mut self, from: &NodePath, to: &NodePath) {
        let paths: Vec<NodePath> = self.nodes.keys().cloned().collect();
        for path in paths {
            let entry = match self.nodes.get_mut(&path) {
                Some(entry) => entry,
                None => continue,
            };
            if rebase_node_references(&mut entry.data, from, to) {
                entry.dirty = true;
                self.mark_dirty(&path);
            }
        }
    }
}

/// Rebase every reference inside one node's data; returns whether anything
/// changed.
fn rebase_node_references(data: &mut NodeData, from: &NodePath, to: &NodePath) -> bool {
    let mut changed = false;

    if let Some(base) = &data.base {
        if let Some(rebased) = base.rebase(from, to) {
            data.base = Some(rebased);
            changed = true;
        }
    }
    for target in data.pointers.values_mut() {
        if let Some(inner) = target {
            if let Some(rebased) = inner.rebase(from, to) {
                *target = Some(rebased);
                changed = true;
            }
        }
    }
    for set in data.sets.values_mut() {
        let needs_rewrite = set.members.keys().any(|m| from.is_prefix_of(m));
        if needs_rewrite {
            let members = std::mem::take(&mut set.members);
            for (member, member_data) in members {
                let member = member.rebase(from, to).unwrap_or(member);
                set.members.insert(member, member_data);
            }
            changed = true;
        }
    }
    for rule in &mut data.meta.children {
        if let Some(rebased) = rule.target.rebase(from, to) {
            rule.target = rebased;
            changed = true;
        }
    }
    for rule in data.meta.pointers.values_mut() {
        for target in &mut rule.targets {
            if let Some(rebased) = target.rebase(from, to) {
                *target = rebased;
                changed = true;
            }
        }
    }
    for targets in data.meta.aspects.values_mut() {
        for target in targets {
            if let Some(rebased) = target.rebase(from, to) {
                *target = rebased;
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_store::{MemoryBackend, ObjectStore, StoreOptions};

    fn fresh_tree() -> Tree {
        let store = Arc::new(ObjectStore::new(
            Arc::new(MemoryBackend::new()),
            StoreOptions::default(),
        ));
        Tree::new(store)
    }

    fn root() -> NodePath {
        NodePath::root()
    }

    #[test]
    fn create_assigns_smallest_unused_relid() {
        let mut tree = fresh_tree();
        let a = tree.create_node(&root(), Some(root()), None).unwrap();
        let b = tree.create_node(&root(), Some(root()), None).unwrap();
        assert_eq!(a.to_string(), "/0");
        assert_eq!(b.to_string(), "/1");

        tree.delete_node(&a).unwrap();
        let c = tree.create_node(&root(), Some(root()), None).unwrap();
        assert_eq!(c.to_string(), "/0");
    }

    #[test]
    fn create_rejects_taken_relid() {
        let mut tree = fresh_tree();
        let relid = Relid::new("x").unwrap();
        tree.create_node(&root(), Some(root()), Some(relid.clone()))
            .unwrap();
        assert!(matches!(
            tree.create_node(&root(), Some(root()), Some(relid)),
            Err(TreeError::RelidInUse { .. })
        ));
    }

    #[test]
    fn create_rejects_unknown_base() {
        let mut tree = fresh_tree();
        let ghost: NodePath = "/99".parse().unwrap();
        assert!(matches!(
            tree.create_node(&root(), Some(ghost), None),
            Err(TreeError::InvalidBase { .. })
        ));
    }

    #[test]
    fn set_base_rejects_inheritance_cycle() {
        let mut tree = fresh_tree();
        let a = tree.create_node(&root(), Some(root()), None).unwrap();
        let b = tree.create_node(&root(), Some(a.clone()), None).unwrap();
        let c = tree.create_node(&root(), Some(b.clone()), None).unwrap();
        // a <- b <- c; closing the loop must fail.
        assert!(matches!(
            tree.set_base(&a, Some(c)),
            Err(TreeError::InvalidBase { .. })
        ));
        assert!(matches!(
            tree.set_base(&a, Some(a.clone())),
            Err(TreeError::InvalidBase { .. })
        ));
    }

    #[test]
    fn delete_removes_subtree() {
        let mut tree = fresh_tree();
        let a = tree.create_node(&root(), Some(root()), None).unwrap();
        let b = tree.create_node(&a, Some(root()), None).unwrap();
        tree.delete_node(&a).unwrap();
        assert!(!tree.is_loaded(&a));
        assert!(!tree.is_loaded(&b));
        assert!(tree.children(&root()).unwrap().is_empty());
    }

    #[test]
    fn move_rejects_own_descendant() {
        let mut tree = fresh_tree();
        let a = tree.create_node(&root(), Some(root()), None).unwrap();
        let b = tree.create_node(&a, Some(root()), None).unwrap();
        assert!(matches!(
            tree.move_node(&a, &b),
            Err(TreeError::InvalidParent { .. })
        ));
        assert!(matches!(
            tree.move_node(&a, &a),
            Err(TreeError::InvalidParent { .. })
        ));
    }

    #[test]
    fn move_keeps_relid_when_free() {
        let mut tree = fresh_tree();
        let container = tree.create_node(&root(), Some(root()), None).unwrap();
        let node = tree
            .create_node(&root(), Some(root()), Some(Relid::new("x").unwrap()))
            .unwrap();
        let moved = tree.move_node(&node, &container).unwrap();
        assert_eq!(moved.relid().unwrap().as_str(), "x");
        assert!(!tree.is_loaded(&node));
        assert!(tree.is_loaded(&moved));
    }

    #[test]
    fn move_rewrites_pointers_into_subtree() {
        let mut tree = fresh_tree();
        let container = tree.create_node(&root(), Some(root()), None).unwrap();
        let target = tree.create_node(&root(), Some(root()), None).unwrap();
        let observer = tree.create_node(&root(), Some(root()), None).unwrap();
        tree.set_pointer(&observer, "watched", Some(target.clone()))
            .unwrap();

        let moved = tree.move_node(&target, &container).unwrap();
        assert_eq!(
            tree.pointer(&observer, "watched").unwrap(),
            Some(Some(moved))
        );
    }

    #[test]
    fn copy_gets_fresh_guids_and_rebased_internal_refs() {
        let mut tree = fresh_tree();
        let original = tree.create_node(&root(), Some(root()), None).unwrap();
        let inner = tree.create_node(&original, Some(root()), None).unwrap();
        tree.set_pointer(&original, "self_ref", Some(inner.clone()))
            .unwrap();
        tree.set_attribute(&inner, "k", json!(1)).unwrap();
        let dest = tree.create_node(&root(), Some(root()), None).unwrap();

        let copy = tree.copy_node(&original, &dest).unwrap();
        assert_ne!(
            tree.node(&copy).unwrap().data.guid,
            tree.node(&original).unwrap().data.guid
        );
        // The internal pointer follows the copy, the original is untouched.
        let copied_inner = match tree.pointer(&copy, "self_ref").unwrap() {
            Some(Some(p)) => p,
            other => panic!("unexpected pointer value: {other:?}"),
        };
        assert!(copy.is_ancestor_of(&copied_inner));
        assert_eq!(
            tree.pointer(&original, "self_ref").unwrap(),
            Some(Some(inner))
        );
        assert_eq!(tree.attribute(&copied_inner, "k").unwrap(), Some(&json!(1)));
    }

    #[test]
    fn meta_generation_tracks_membership_changes() {
        let mut tree = fresh_tree();
        let element = tree.create_node(&root(), Some(root()), None).unwrap();
        let before = tree.meta_generation();

        tree.add_set_member(&root(), META_ASPECT_SET, &element)
            .unwrap();
        assert!(tree.meta_generation() > before);

        // Unrelated set traffic does not invalidate.
        let g = tree.meta_generation();
        tree.add_set_member(&root(), "plain", &element).unwrap();
        assert_eq!(tree.meta_generation(), g);

        // Deleting a tracked member both bumps and prunes the membership.
        tree.delete_node(&element).unwrap();
        assert!(tree.meta_generation() > g);
        assert!(tree
            .set_members(&root(), META_ASPECT_SET)
            .unwrap()
            .members
            .is_empty());
    }
}
