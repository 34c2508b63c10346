//! Persisted node records
//!
//! [`NodeRecord`] is the immutable, hashable serialization of a node's own
//! (non-inherited) data plus its child relid→hash links. Records use
//! `BTreeMap` fields throughout so their canonical JSON encoding — and
//! therefore their content hash — is deterministic.

use crate::hash::ObjectHash;
use crate::path::{NodePath, Relid};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A node's own data: everything except containment links
///
/// Inherited values are not stored; the effective view is resolved at read
/// time by walking the base chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Stable identity across snapshots (move/rename survivable)
    pub guid: Uuid,

    /// Identifier among siblings
    pub relid: Relid,

    /// Inheritance parent; `None` only for the universal base (FCO)
    pub base: Option<NodePath>,

    /// Own attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// Own pointers; `None` target = explicitly nulled pointer
    #[serde(default)]
    pub pointers: BTreeMap<String, Option<NodePath>>,

    /// Own sets
    #[serde(default)]
    pub sets: BTreeMap<String, SetData>,

    /// View-layer metadata, opaque to the core
    #[serde(default)]
    pub registry: BTreeMap<String, Value>,

    /// Own meta rules (type definitions)
    #[serde(default)]
    pub meta: MetaRules,
}

impl NodeData {
    /// Fresh node data with a random guid
    #[must_use]
    pub fn new(relid: Relid, base: Option<NodePath>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            relid,
            base,
            attributes: BTreeMap::new(),
            pointers: BTreeMap::new(),
            sets: BTreeMap::new(),
            registry: BTreeMap::new(),
            meta: MetaRules::default(),
        }
    }
}

/// Ordered set membership with optional per-member data
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetData {
    /// Members in insertion order, keyed by their path
    #[serde(default)]
    pub members: IndexMap<NodePath, MemberData>,
}

/// Attributes and registry attached to a single set membership
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemberData {
    /// Attributes attached to the membership itself
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// View-layer metadata attached to the membership
    #[serde(default)]
    pub registry: BTreeMap<String, Value>,
}

/// Meta rules a node contributes as a type definition
///
/// Effective rules are the union over the base chain, own rules first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaRules {
    /// Valid containment: which types may appear as children, with cardinality
    #[serde(default)]
    pub children: Vec<ChildRule>,

    /// Valid pointer targets per pointer name, with cardinality
    #[serde(default)]
    pub pointers: BTreeMap<String, PointerRule>,

    /// Named views: aspect name → visible member types
    #[serde(default)]
    pub aspects: BTreeMap<String, Vec<NodePath>>,

    /// Abstract types cannot be instantiated as concrete children
    #[serde(default)]
    pub is_abstract: bool,
}

impl MetaRules {
    /// Whether this rule set carries no information
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
            && self.pointers.is_empty()
            && self.aspects.is_empty()
            && !self.is_abstract
    }
}

/// Containment rule: `target` (a meta node) may appear as a child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRule {
    /// Path of the allowed child type
    pub target: NodePath,

    /// Minimum cardinality; -1 = no lower bound
    pub min: i64,

    /// Maximum cardinality; -1 = unbounded
    pub max: i64,
}

/// Pointer (or set) rule: allowed target types and cardinality
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointerRule {
    /// Paths of allowed target types
    #[serde(default)]
    pub targets: Vec<NodePath>,

    /// Minimum cardinality; -1 = no lower bound
    #[serde(default)]
    pub min: i64,

    /// Maximum cardinality; -1 = unbounded
    #[serde(default)]
    pub max: i64,
}

/// Immutable persisted form of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node's own data
    pub data: NodeData,

    /// Child relid → record hash
    #[serde(default)]
    pub children: BTreeMap<Relid, ObjectHash>,
}

impl NodeRecord {
    /// Record with no children
    #[must_use]
    pub fn leaf(data: NodeData) -> Self {
        Self {
            data,
            children: BTreeMap::new(),
        }
    }

    /// Canonical JSON encoding used for hashing
    ///
    /// # Errors
    /// Returns an error if serialization fails (non-finite floats in
    /// attribute values are the only realistic cause).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// The record's content address
    ///
    /// # Errors
    /// Propagates canonical-encoding failures.
    pub fn compute_hash(&self) -> Result<ObjectHash, serde_json::Error> {
        Ok(ObjectHash::compute(&self.canonical_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_record() -> NodeRecord {
        let mut data = NodeData::new(Relid::from_index(1), Some(NodePath::root()));
        data.attributes
            .insert("name".into(), Value::String("sample".into()));
        data.pointers
            .insert("ref".into(), Some(NodePath::from_str("/2").unwrap()));
        let mut record = NodeRecord::leaf(data);
        record.children.insert(
            Relid::from_index(0),
            ObjectHash::compute(b"child"),
        );
        record
    }

    #[test]
    fn record_hash_deterministic() {
        let record = sample_record();
        assert_eq!(
            record.compute_hash().unwrap(),
            record.compute_hash().unwrap()
        );
    }

    #[test]
    fn record_hash_changes_with_content() {
        let record = sample_record();
        let mut other = record.clone();
        other
            .data
            .attributes
            .insert("name".into(), Value::String("other".into()));
        assert_ne!(
            record.compute_hash().unwrap(),
            other.compute_hash().unwrap()
        );
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let decoded: NodeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
        assert_eq!(
            record.compute_hash().unwrap(),
            decoded.compute_hash().unwrap()
        );
    }

    #[test]
    fn meta_rules_is_empty() {
        assert!(MetaRules::default().is_empty());
        let mut rules = MetaRules::default();
        rules.is_abstract = true;
        assert!(!rules.is_empty());
    }
}
