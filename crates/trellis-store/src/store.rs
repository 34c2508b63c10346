//! The object store
//!
//! [`ObjectStore`] fronts an [`ObjectBackend`] with a two-generation cache,
//! a queued-persist buffer for locally created records the backend has not
//! yet acknowledged, and coalescing of concurrent loads of the same hash.

use crate::backend::ObjectBackend;
use crate::cache::GenerationCache;
use crate::error::StoreError;
use crate::hash::ObjectHash;
use crate::patch::PatchRecord;
use crate::path::NodePath;
use crate::record::NodeRecord;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Tuning options for the store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Capacity of the primary cache generation
    pub cache_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 2000,
        }
    }
}

/// Content-addressed record store
///
/// Lookup order on a load: primary cache generation, backup generation,
/// queued persists, then a (coalesced) backend fetch. Safe for concurrent
/// use; the only shared mutable state across sessions is here.
#[derive(Debug)]
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    cache: GenerationCache,
    /// Records created locally, not yet acknowledged by the backend
    pending: DashMap<ObjectHash, Arc<NodeRecord>>,
    /// In-flight backend fetches, for request deduplication
    inflight: DashMap<ObjectHash, Arc<OnceCell<Option<Arc<NodeRecord>>>>>,
}

impl ObjectStore {
    /// Create a store over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn ObjectBackend>, options: StoreOptions) -> Self {
        Self {
            backend,
            cache: GenerationCache::new(options.cache_capacity),
            pending: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    /// Resolve a hash without touching the backend
    #[must_use]
    pub fn get_local(&self, hash: &ObjectHash) -> Option<Arc<NodeRecord>> {
        self.cache
            .get(hash)
            .or_else(|| self.pending.get(hash).map(|r| Arc::clone(&r)))
    }

    /// Load a record by hash
    ///
    /// Concurrent loads of the same hash are coalesced into one backend
    /// fetch; every waiter resolves from its result.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the hash resolves nowhere.
    pub async fn load(&self, hash: &ObjectHash) -> Result<Arc<NodeRecord>, StoreError> {
        if let Some(record) = self.get_local(hash) {
            return Ok(record);
        }

        let cell = self
            .inflight
            .entry(*hash)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                tracing::trace!(hash = %hash.short(), "fetching record from backend");
                let fetched = self.backend.fetch(hash).await?;
                let record = fetched.map(Arc::new);
                if let Some(record) = &record {
                    self.cache.insert(*hash, Arc::clone(record));
                }
                Ok::<_, StoreError>(record)
            })
            .await
            .map(Clone::clone);
        self.inflight.remove(hash);

        result?.ok_or(StoreError::NotFound(*hash))
    }

    /// Bulk prefetch: make every record along `paths` locally resolvable
    ///
    /// Starting from the root record, each path is walked through records
    /// that are already local; the first unresolved hash of every blocked
    /// path is collected and fetched in a single batch, then the walk
    /// resumes. Round trips are therefore bounded by tree depth, not by the
    /// number of requested nodes.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if a needed record is missing from
    /// the backend, or [`StoreError::InvalidPath`] if a path names a relid
    /// its parent record does not contain.
    pub async fn load_paths(
        &self,
        root: &ObjectHash,
        paths: &[NodePath],
    ) -> Result<(), StoreError> {
        let mut remaining: Vec<&NodePath> = paths.iter().collect();
        while !remaining.is_empty() {
            let mut missing: Vec<ObjectHash> = Vec::new();
            let mut blocked = Vec::new();
            for path in remaining {
                if let Some(hash) = self.walk_local(root, path)? {
                    if !missing.contains(&hash) {
                        missing.push(hash);
                    }
                    blocked.push(path);
                }
            }
            if missing.is_empty() {
                break;
            }
            tracing::trace!(count = missing.len(), "prefetching record batch");
            let fetched = self.backend.fetch_batch(&missing).await?;
            for (hash, record) in missing.iter().zip(fetched) {
                let record = record.ok_or(StoreError::NotFound(*hash))?;
                self.cache.insert(*hash, Arc::new(record));
            }
            remaining = blocked;
        }
        Ok(())
    }

    /// Walk a path through local records; `Ok(Some(hash))` is the first
    /// unresolved hash, `Ok(None)` means the whole path is local.
    fn walk_local(
        &self,
        root: &ObjectHash,
        path: &NodePath,
    ) -> Result<Option<ObjectHash>, StoreError> {
        let mut hash = *root;
        let mut record = match self.get_local(&hash) {
            Some(record) => record,
            None => return Ok(Some(hash)),
        };
        for relid in path.segments() {
            let child = record
                .children
                .get(relid)
                .copied()
                .ok_or_else(|| StoreError::InvalidPath {
                    parent: hash,
                    relid: relid.as_str().to_string(),
                })?;
            hash = child;
            record = match self.get_local(&hash) {
                Some(record) => record,
                None => return Ok(Some(hash)),
            };
        }
        Ok(None)
    }

    /// Insert a full record, returning its hash
    ///
    /// The record lands in the queued-persist buffer (and the cache) and is
    /// written to the backend on the next [`flush`](Self::flush).
    ///
    /// # Errors
    /// Returns an error only if the record cannot be canonically encoded.
    pub fn insert(&self, record: NodeRecord) -> Result<ObjectHash, StoreError> {
        let hash = record.compute_hash()?;
        let record = Arc::new(record);
        self.cache.insert(hash, Arc::clone(&record));
        self.pending.insert(hash, record);
        Ok(hash)
    }

    /// Insert a record delivered as a patch against a known base
    ///
    /// Best effort: if the base is not locally resolvable or the edit-script
    /// does not apply, the patch is logged and dropped. Correctness never
    /// depends on this succeeding; the full record can be fetched instead.
    pub fn insert_patch(&self, patch: &PatchRecord) {
        let Some(base) = self.get_local(&patch.base) else {
            tracing::warn!(
                id = %patch.id.short(),
                base = %patch.base.short(),
                "dropping patch: base record not locally resolvable"
            );
            return;
        };
        match patch.apply(&base) {
            Ok(record) => {
                let record = Arc::new(record);
                self.cache.insert(patch.id, Arc::clone(&record));
                self.pending.insert(patch.id, record);
            }
            Err(err) => {
                tracing::warn!(id = %patch.id.short(), error = %err, "dropping malformed patch");
            }
        }
    }

    /// Write all queued records through the backend and clear the buffer
    ///
    /// # Errors
    /// Returns the backend error; the buffer is kept intact for a retry.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let batch: Vec<(ObjectHash, Arc<NodeRecord>)> = self
            .pending
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }
        self.backend.write_batch(&batch).await?;
        for (hash, _) in &batch {
            self.pending.remove(hash);
        }
        Ok(batch.len())
    }

    /// Number of records queued for persistence
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
