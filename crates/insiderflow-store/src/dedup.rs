//! Two-tier duplicate detection.
//!
//! The point index is fast but only eventually consistent: a hit proves the
//! filing was ingested, a miss proves nothing. Misses are confirmed against
//! a bulk scan of the partitioned store before a filing is treated as new.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use insiderflow_core::{AccessionNumber, DedupEntry, FilingIdentity};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{ParquetStore, StoreError};

/// Most keys accepted by one [`DedupIndex::get_batch`] call.
pub const MAX_BATCH_GET: usize = 100;
/// Most entries accepted by one [`DedupIndex::put_batch`] call.
pub const MAX_BATCH_PUT: usize = 25;

/// Low-latency point lookup of already-ingested filings.
#[async_trait]
pub trait DedupIndex: Send + Sync {
    /// Look up at most [`MAX_BATCH_GET`] keys. Absent keys are simply missing from the map.
    async fn get_batch(
        &self,
        keys: &[AccessionNumber],
    ) -> Result<HashMap<AccessionNumber, DedupEntry>, StoreError>;

    /// Insert at most [`MAX_BATCH_PUT`] entries.
    async fn put_batch(&self, entries: &[DedupEntry]) -> Result<(), StoreError>;
}

/// Authoritative but slower existence check over stored data.
#[async_trait]
pub trait BulkScan: Send + Sync {
    /// The subset of `keys` present in durable storage.
    async fn existing(
        &self,
        keys: &[AccessionNumber],
    ) -> Result<HashSet<AccessionNumber>, StoreError>;
}

fn check_limit(limit: usize, got: usize) -> Result<(), StoreError> {
    if got > limit {
        return Err(StoreError::BatchTooLarge { limit, got });
    }
    Ok(())
}

/// In-process index, optionally persisted as JSON lines so it survives restarts.
#[derive(Debug, Default)]
pub struct LocalIndex {
    entries: RwLock<HashMap<AccessionNumber, DedupEntry>>,
    path: Option<PathBuf>,
}

impl LocalIndex {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load (or start) an index file. Unreadable lines are skipped.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut entries = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<DedupEntry>(line) {
                        Ok(entry) => {
                            entries.insert(entry.lookup_key.clone(), entry);
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "skipping bad index line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(path = %path.display(), entries = entries.len(), "opened dedup index");
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl DedupIndex for LocalIndex {
    async fn get_batch(
        &self,
        keys: &[AccessionNumber],
    ) -> Result<HashMap<AccessionNumber, DedupEntry>, StoreError> {
        check_limit(MAX_BATCH_GET, keys.len())?;
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|e| (k.clone(), e.clone())))
            .collect())
    }

    async fn put_batch(&self, batch: &[DedupEntry]) -> Result<(), StoreError> {
        check_limit(MAX_BATCH_PUT, batch.len())?;
        let mut entries = self.entries.write().await;
        let fresh: Vec<&DedupEntry> = batch
            .iter()
            .filter(|e| !entries.contains_key(&e.lookup_key))
            .collect();

        if let Some(path) = &self.path
            && !fresh.is_empty()
        {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut buf = Vec::new();
            for entry in &fresh {
                serde_json::to_writer(&mut buf, entry)?;
                buf.push(b'\n');
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(&buf).await?;
            file.flush().await?;
        }

        for entry in batch {
            entries.insert(entry.lookup_key.clone(), entry.clone());
        }
        Ok(())
    }
}

/// Bulk scan over the accession column of every stored partition file.
#[derive(Debug, Clone)]
pub struct ParquetScan {
    store: ParquetStore,
}

impl ParquetScan {
    pub fn new(store: ParquetStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BulkScan for ParquetScan {
    async fn existing(
        &self,
        keys: &[AccessionNumber],
    ) -> Result<HashSet<AccessionNumber>, StoreError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.scan_accessions())
            .await
            .map_err(|e| StoreError::Other(format!("scan task failed: {e}")))??;
        let stored: HashSet<String> = stored.into_iter().collect();
        Ok(keys
            .iter()
            .filter(|k| stored.contains(k.as_str()))
            .cloned()
            .collect())
    }
}

/// Point index backed by a bulk scan for inconclusive misses.
pub struct TwoTierDedup {
    index: Option<Arc<dyn DedupIndex>>,
    scan: Arc<dyn BulkScan>,
    degraded_logged: AtomicBool,
}

impl TwoTierDedup {
    pub fn new(index: Option<Arc<dyn DedupIndex>>, scan: Arc<dyn BulkScan>) -> Self {
        Self {
            index,
            scan,
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> Option<Arc<dyn DedupIndex>> {
        self.index.clone()
    }

    /// Keys the point index reports as ingested. Any index failure yields an
    /// empty set so every key falls through to the scan.
    async fn index_hits(&self, keys: &[AccessionNumber]) -> HashSet<AccessionNumber> {
        let Some(index) = &self.index else {
            return HashSet::new();
        };
        let mut hits = HashSet::new();
        for chunk in keys.chunks(MAX_BATCH_GET) {
            match index.get_batch(chunk).await {
                Ok(found) => hits.extend(found.into_keys()),
                Err(e) => {
                    if !self.degraded_logged.swap(true, Ordering::Relaxed) {
                        warn!(error = %e, "dedup index unavailable; falling back to bulk scan");
                    }
                    return HashSet::new();
                }
            }
        }
        hits
    }

    /// Keep only filings that are neither indexed nor present in storage.
    ///
    /// Input order is preserved and repeated accessions collapse to their
    /// first occurrence. A scan failure is returned as an error, since without
    /// it a miss cannot be confirmed.
    pub async fn filter_new(
        &self,
        candidates: Vec<FilingIdentity>,
    ) -> Result<Vec<FilingIdentity>, StoreError> {
        let mut seen = HashSet::new();
        let candidates: Vec<FilingIdentity> = candidates
            .into_iter()
            .filter(|f| seen.insert(f.accession.clone()))
            .collect();
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let keys: Vec<AccessionNumber> = candidates.iter().map(|f| f.accession.clone()).collect();
        let hits = self.index_hits(&keys).await;
        let misses: Vec<AccessionNumber> = keys
            .iter()
            .filter(|k| !hits.contains(*k))
            .cloned()
            .collect();

        let stored = if misses.is_empty() {
            HashSet::new()
        } else {
            self.scan.existing(&misses).await?
        };
        if !stored.is_empty() {
            debug!(count = stored.len(), "index misses found by bulk scan");
        }

        let fresh: Vec<FilingIdentity> = candidates
            .into_iter()
            .filter(|f| !hits.contains(&f.accession) && !stored.contains(&f.accession))
            .collect();
        info!(
            candidates = keys.len(),
            indexed = hits.len(),
            scanned = stored.len(),
            new = fresh.len(),
            "dedup complete"
        );
        Ok(fresh)
    }
}

/// Write entries to the index in put-sized chunks. Failures are logged, not returned.
pub async fn put_best_effort(index: &dyn DedupIndex, entries: &[DedupEntry]) {
    for chunk in entries.chunks(MAX_BATCH_PUT) {
        if let Err(e) = index.put_batch(chunk).await {
            warn!(error = %e, entries = chunk.len(), "dedup index write failed");
        }
    }
}
