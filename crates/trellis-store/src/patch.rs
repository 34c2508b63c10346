//! Patch records
//!
//! A [`PatchRecord`] carries a record as an edit-script against a named base
//! record instead of a full serialization, reducing storage and transfer
//! volume for small edits. Patches are a best-effort optimization: a patch
//! that cannot be resolved or applied is dropped, never an error surfaced to
//! the caller, because the full record can always be fetched directly.

use crate::hash::ObjectHash;
use crate::record::NodeRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire shape of a patch: `{ id, base, ops }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    /// Hash of the full record the patch reconstructs
    pub id: ObjectHash,

    /// Hash of the base record the edit-script applies to
    pub base: ObjectHash,

    /// Edit-script over the base record's JSON form
    pub ops: Vec<PatchOp>,
}

/// A single edit over the record's JSON representation
///
/// Paths address object fields only; patching inside arrays is expressed by
/// replacing the owning field wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Set (or insert) the value at `path`
    Set { path: Vec<String>, value: Value },

    /// Remove the value at `path`
    Remove { path: Vec<String> },
}

impl PatchRecord {
    /// Resolve the patch against its base into a full record
    ///
    /// # Errors
    /// Returns [`PatchApplyError`] if the edit-script does not fit the base
    /// or the rebuilt record's hash does not match the declared `id`.
    pub fn apply(&self, base: &NodeRecord) -> Result<NodeRecord, PatchApplyError> {
        let mut doc = serde_json::to_value(base)?;
        for op in &self.ops {
            apply_op(&mut doc, op)?;
        }
        let record: NodeRecord = serde_json::from_value(doc)
            .map_err(|e| PatchApplyError::InvalidResult(e.to_string()))?;
        let actual = record.compute_hash()?;
        if actual != self.id {
            return Err(PatchApplyError::HashMismatch {
                declared: self.id,
                actual,
            });
        }
        Ok(record)
    }
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchApplyError> {
    let (path, remove) = match op {
        PatchOp::Set { path, .. } => (path, false),
        PatchOp::Remove { path } => (path, true),
    };
    let Some((leaf, parents)) = path.split_last() else {
        return Err(PatchApplyError::EmptyPath);
    };

    let mut cursor = doc;
    for key in parents {
        cursor = cursor
            .as_object_mut()
            .and_then(|map| map.get_mut(key))
            .ok_or_else(|| PatchApplyError::MissingField(key.clone()))?;
    }
    let map = cursor
        .as_object_mut()
        .ok_or_else(|| PatchApplyError::MissingField(leaf.clone()))?;

    if remove {
        map.remove(leaf)
            .ok_or_else(|| PatchApplyError::MissingField(leaf.clone()))?;
    } else if let PatchOp::Set { value, .. } = op {
        map.insert(leaf.clone(), value.clone());
    }
    Ok(())
}

/// Reasons a patch fails to apply to its declared base
#[derive(Debug, thiserror::Error)]
pub enum PatchApplyError {
    /// Edit path addressed a field the base does not have
    #[error("patch addresses missing field '{0}'")]
    MissingField(String),

    /// Edit path was empty
    #[error("patch op has empty path")]
    EmptyPath,

    /// Patched document no longer deserializes as a record
    #[error("patched document is not a valid record: {0}")]
    InvalidResult(String),

    /// Rebuilt record hashes differently than the patch declared
    #[error("patched record hash {actual} does not match declared id {declared}")]
    HashMismatch {
        declared: ObjectHash,
        actual: ObjectHash,
    },

    /// Base record failed to serialize
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NodeData, NodeRecord};
    use crate::path::Relid;
    use serde_json::json;

    fn base_record() -> NodeRecord {
        let mut data = NodeData::new(Relid::from_index(0), None);
        data.attributes.insert("name".into(), json!("base"));
        NodeRecord::leaf(data)
    }

    fn patched(base: &NodeRecord) -> NodeRecord {
        let mut next = base.clone();
        next.data.attributes.insert("name".into(), json!("edited"));
        next
    }

    #[test]
    fn patch_apply_roundtrip() {
        let base = base_record();
        let target = patched(&base);
        let patch = PatchRecord {
            id: target.compute_hash().unwrap(),
            base: base.compute_hash().unwrap(),
            ops: vec![PatchOp::Set {
                path: vec!["data".into(), "attributes".into(), "name".into()],
                value: json!("edited"),
            }],
        };
        let rebuilt = patch.apply(&base).unwrap();
        assert_eq!(rebuilt, target);
    }

    #[test]
    fn patch_apply_detects_hash_mismatch() {
        let base = base_record();
        let patch = PatchRecord {
            id: ObjectHash::compute(b"not the result"),
            base: base.compute_hash().unwrap(),
            ops: vec![PatchOp::Set {
                path: vec!["data".into(), "attributes".into(), "name".into()],
                value: json!("edited"),
            }],
        };
        assert!(matches!(
            patch.apply(&base),
            Err(PatchApplyError::HashMismatch { .. })
        ));
    }

    #[test]
    fn patch_apply_rejects_missing_field() {
        let base = base_record();
        let patch = PatchRecord {
            id: ObjectHash::compute(b"whatever"),
            base: base.compute_hash().unwrap(),
            ops: vec![PatchOp::Remove {
                path: vec!["data".into(), "attributes".into(), "absent".into()],
            }],
        };
        assert!(matches!(
            patch.apply(&base),
            Err(PatchApplyError::MissingField(_))
        ));
    }

    #[test]
    fn patch_remove_op() {
        let base = base_record();
        let mut target = base.clone();
        target.data.attributes.remove("name");
        let patch = PatchRecord {
            id: target.compute_hash().unwrap(),
            base: base.compute_hash().unwrap(),
            ops: vec![PatchOp::Remove {
                path: vec!["data".into(), "attributes".into(), "name".into()],
            }],
        };
        assert_eq!(patch.apply(&base).unwrap(), target);
    }
}
