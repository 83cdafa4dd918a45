//! In-memory batch buffer in front of the partitioned store.
//!
//! Records accumulate until either the size threshold is reached or the
//! oldest unflushed record has waited `max_age`. A flush groups records by
//! the year/month of their transaction date and writes one file per group.
//! Groups that fail stay buffered for the next trigger; groups that succeed
//! are never rewritten. Rows repeating a `record_key` already in the buffer
//! are dropped. Once a group is durable its filings are indexed and the
//! records go to the [`FlushObserver`], if any. Delivery is at-least-once:
//! a crash after a write but before the upstream acknowledgement can repeat
//! rows, which carry a deterministic `record_key` for downstream dedup.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use insiderflow_core::filings::records_to_batch;
use insiderflow_core::{AccessionNumber, DedupEntry, Partition, TransactionRecord};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dedup::{DedupIndex, put_best_effort};
use crate::{PartitionSink, StoreError};

pub const DEFAULT_MAX_RECORDS: usize = 50;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);
pub const DEFAULT_HARD_CAP: usize = 5_000;
pub const DEFAULT_ALERT_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush as soon as this many records are buffered.
    pub max_records: usize,
    /// Flush once the oldest unflushed record has waited this long.
    pub max_age: Duration,
    /// Refuse new records beyond this many buffered.
    pub hard_cap: usize,
    /// Consecutive failed flushes before raising an operator alert.
    pub alert_after_failures: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_age: DEFAULT_MAX_AGE,
            hard_cap: DEFAULT_HARD_CAP,
            alert_after_failures: DEFAULT_ALERT_AFTER_FAILURES,
        }
    }
}

/// Outcome of one successful flush.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlushReport {
    pub rows: usize,
    pub files: Vec<PathBuf>,
    pub partitions: Vec<Partition>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Sees every record once its partition file is durable.
pub trait FlushObserver: Send + Sync {
    fn flushed(&self, records: &[TransactionRecord]);
}

pub struct BatchWriter {
    sink: Arc<dyn PartitionSink>,
    index: Option<Arc<dyn DedupIndex>>,
    observer: Option<Arc<dyn FlushObserver>>,
    config: BatchConfig,
    buffer: Vec<TransactionRecord>,
    deadline: Option<Instant>,
    consecutive_failures: u32,
    index_writes: Vec<JoinHandle<()>>,
}

impl BatchWriter {
    pub fn new(sink: Arc<dyn PartitionSink>, config: BatchConfig) -> Self {
        Self {
            sink,
            index: None,
            observer: None,
            config,
            buffer: Vec::new(),
            deadline: None,
            consecutive_failures: 0,
            index_writes: Vec::new(),
        }
    }

    /// Record each flushed filing in `index` after its rows are durable.
    pub fn with_index(mut self, index: Arc<dyn DedupIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn FlushObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Buffered, not yet durable, records.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Filings with rows still waiting in the buffer.
    pub fn pending_accessions(&self) -> HashSet<AccessionNumber> {
        self.buffer.iter().map(|r| r.accession.clone()).collect()
    }

    /// When the time-based flush is due, if anything is buffered.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Accept records into the buffer, flushing if the size threshold is
    /// reached or the oldest buffered record has waited `max_age`.
    ///
    /// Fails only when the buffer would exceed its hard cap, in which case
    /// nothing is accepted. A failed flush here is logged and its records
    /// stay buffered.
    pub async fn add(
        &mut self,
        records: Vec<TransactionRecord>,
    ) -> Result<Option<FlushReport>, StoreError> {
        if records.is_empty() {
            return Ok(None);
        }
        if self.buffer.len() + records.len() > self.config.hard_cap {
            error!(
                pending = self.buffer.len(),
                incoming = records.len(),
                cap = self.config.hard_cap,
                "write buffer full; refusing records"
            );
            return Err(StoreError::BufferOverflow {
                cap: self.config.hard_cap,
            });
        }

        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.config.max_age);
        }
        self.buffer.extend(records);
        debug!(pending = self.buffer.len(), "records buffered");

        let expired = self.deadline.is_some_and(|due| Instant::now() >= due);
        if self.buffer.len() < self.config.max_records && !expired {
            return Ok(None);
        }
        match self.flush().await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                warn!(error = %e, pending = self.buffer.len(), "buffered flush failed; records retained");
                Ok(None)
            }
        }
    }

    /// Flush if the time threshold has passed.
    pub async fn flush_if_due(&mut self) -> Result<Option<FlushReport>, StoreError> {
        self.flush_if_due_at(Instant::now()).await
    }

    pub async fn flush_if_due_at(
        &mut self,
        now: Instant,
    ) -> Result<Option<FlushReport>, StoreError> {
        match self.deadline {
            Some(due) if now >= due => self.flush().await.map(Some),
            _ => Ok(None),
        }
    }

    /// Write everything buffered, one file per year/month partition.
    ///
    /// On failure the failed groups stay buffered, the timer is re-armed,
    /// and the first failure is returned. Groups written in the same call
    /// are not retained and will not be rewritten.
    pub async fn flush(&mut self) -> Result<FlushReport, StoreError> {
        if self.buffer.is_empty() {
            self.deadline = None;
            return Ok(FlushReport::default());
        }

        let mut groups: BTreeMap<Partition, Vec<TransactionRecord>> = BTreeMap::new();
        let mut keys = HashSet::new();
        let mut repeated = 0usize;
        for record in std::mem::take(&mut self.buffer) {
            if !keys.insert(record.record_key()) {
                repeated += 1;
                continue;
            }
            groups.entry(record.partition()).or_default().push(record);
        }
        if repeated > 0 {
            warn!(repeated, "dropped buffered rows with repeated record keys");
        }

        let mut report = FlushReport::default();
        let mut written = Vec::new();
        let mut retained = Vec::new();
        let mut first_err = None;

        for (partition, group) in groups {
            let result = match records_to_batch(&group) {
                Ok(batch) => self.sink.write_partition(partition, batch).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(path) => {
                    report.rows += group.len();
                    report.files.push(path);
                    report.partitions.push(partition);
                    written.extend(group);
                }
                Err(e) => {
                    error!(partition = %partition, rows = group.len(), error = %e, "partition write failed");
                    retained.extend(group);
                    first_err.get_or_insert(StoreError::PartitionWrite {
                        partition: partition.to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        self.index_written(&written, &retained);
        if let Some(observer) = &self.observer
            && !written.is_empty()
        {
            observer.flushed(&written);
        }

        if let Some(err) = first_err {
            self.buffer = retained;
            self.deadline = Some(Instant::now() + self.config.max_age);
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.config.alert_after_failures {
                error!(
                    failures = self.consecutive_failures,
                    pending = self.buffer.len(),
                    "ALERT: storage writes failing repeatedly"
                );
            }
            return Err(err);
        }

        self.deadline = None;
        self.consecutive_failures = 0;
        info!(
            rows = report.rows,
            files = report.files.len(),
            "flushed transactions"
        );
        Ok(report)
    }

    /// Queue index entries for filings whose rows are all durable.
    fn index_written(&mut self, written: &[TransactionRecord], retained: &[TransactionRecord]) {
        let Some(index) = &self.index else {
            return;
        };
        let pending: HashSet<_> = retained.iter().map(|r| &r.accession).collect();
        let mut seen = HashSet::new();
        let entries: Vec<DedupEntry> = written
            .iter()
            .filter(|r| !pending.contains(&r.accession) && seen.insert(&r.accession))
            .map(DedupEntry::for_record)
            .collect();
        if entries.is_empty() {
            return;
        }

        self.index_writes.retain(|h| !h.is_finished());
        let index = Arc::clone(index);
        self.index_writes.push(tokio::spawn(async move {
            put_best_effort(index.as_ref(), &entries).await;
        }));
    }

    /// Final flush, then wait for outstanding index writes.
    pub async fn drain(&mut self) -> Result<FlushReport, StoreError> {
        let result = self.flush().await;
        for handle in self.index_writes.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "index write task failed");
            }
        }
        if let Err(e) = &result {
            error!(error = %e, pending = self.buffer.len(), "records left unflushed at shutdown");
        }
        result
    }
}
