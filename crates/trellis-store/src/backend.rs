//! Backing medium abstraction
//!
//! The store talks to its persistence layer through [`ObjectBackend`], an
//! async trait so callers suspend on fetches instead of blocking the
//! process. [`MemoryBackend`] is the in-process implementation used by tests
//! and single-process deployments.

use crate::hash::ObjectHash;
use crate::record::NodeRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Asynchronous record fetch/write interface to the backing medium
#[async_trait]
pub trait ObjectBackend: Send + Sync + std::fmt::Debug {
    /// Fetch one record; `Ok(None)` means the backend has no such record
    async fn fetch(&self, hash: &ObjectHash) -> Result<Option<NodeRecord>, BackendError>;

    /// Fetch a batch in one round trip; result is positional
    async fn fetch_batch(
        &self,
        hashes: &[ObjectHash],
    ) -> Result<Vec<Option<NodeRecord>>, BackendError> {
        futures::future::try_join_all(hashes.iter().map(|hash| self.fetch(hash))).await
    }

    /// Write a batch of records; must be idempotent (records are immutable)
    async fn write_batch(
        &self,
        records: &[(ObjectHash, Arc<NodeRecord>)],
    ) -> Result<(), BackendError>;
}

/// Errors from the backing medium
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Transport or storage failure, retryable by the caller
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned data that does not decode as a record
    #[error("corrupt record for {hash}: {reason}")]
    Corrupt { hash: ObjectHash, reason: String },
}

/// In-memory backend over a concurrent map
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<ObjectHash, Arc<NodeRecord>>,
}

impl MemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the backend holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Direct insert, for seeding tests
    pub fn put(&self, hash: ObjectHash, record: NodeRecord) {
        self.records.insert(hash, Arc::new(record));
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn fetch(&self, hash: &ObjectHash) -> Result<Option<NodeRecord>, BackendError> {
        Ok(self.records.get(hash).map(|r| NodeRecord::clone(&r)))
    }

    async fn fetch_batch(
        &self,
        hashes: &[ObjectHash],
    ) -> Result<Vec<Option<NodeRecord>>, BackendError> {
        Ok(hashes
            .iter()
            .map(|h| self.records.get(h).map(|r| NodeRecord::clone(&r)))
            .collect())
    }

    async fn write_batch(
        &self,
        records: &[(ObjectHash, Arc<NodeRecord>)],
    ) -> Result<(), BackendError> {
        for (hash, record) in records {
            self.records.insert(*hash, Arc::clone(record));
        }
        Ok(())
    }
}
