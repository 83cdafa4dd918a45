//! Per-entity ingestion: discover, dedup, fetch, extract, buffer. Alerts
//! are raised from durable records only, after each flush.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use insiderflow_core::{
    AlertSink, DedupEntry, EntityId, Extractor, FilingIdentity, TransactionRecord, select_signals,
};
use insiderflow_fetch::{FetchError, SourceClient};
use insiderflow_store::dedup::put_best_effort;
use insiderflow_store::{
    BatchWriter, FlushObserver, FlushReport, ReviewEntry, ReviewLog, ReviewReason, StoreError,
    TwoTierDedup,
};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// The write buffer hit its hard cap; the worker must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(StoreError::BufferOverflow { .. }))
    }

    /// Worth redelivering the work item later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Store(_) => !self.is_fatal(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub form_type: String,
    pub max_candidates: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            form_type: "4".to_string(),
            max_candidates: insiderflow_fetch::DEFAULT_MAX_CANDIDATES,
        }
    }
}

/// What happened to one filing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilingOutcome {
    Ingested { rows: usize },
    /// A payload was found but held no transactions.
    NoTransactions,
    /// No candidate document yielded a payload.
    Unparseable,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntityReport {
    pub discovered: usize,
    pub new: usize,
    pub ingested: usize,
    pub rows: usize,
    pub empty: usize,
    pub unparseable: usize,
    /// Filings that failed transiently and are left for redelivery.
    pub failed: usize,
}

impl EntityReport {
    fn tally(&mut self, outcome: FilingOutcome) {
        match outcome {
            FilingOutcome::Ingested { rows } => {
                self.ingested += 1;
                self.rows += rows;
            }
            FilingOutcome::NoTransactions => self.empty += 1,
            FilingOutcome::Unparseable => self.unparseable += 1,
        }
    }
}

/// Signal filter over flushed records, feeding the alert sink.
pub struct SignalStage {
    alerts: Arc<dyn AlertSink>,
    raised: AtomicUsize,
}

impl SignalStage {
    pub fn new(alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            alerts,
            raised: AtomicUsize::new(0),
        }
    }

    /// Signals handed to the alert sink so far.
    pub fn raised(&self) -> usize {
        self.raised.load(Ordering::Relaxed)
    }
}

impl FlushObserver for SignalStage {
    fn flushed(&self, records: &[TransactionRecord]) {
        let signals = select_signals(records);
        if signals.is_empty() {
            return;
        }
        self.raised.fetch_add(signals.len(), Ordering::Relaxed);
        self.alerts.alert(&signals);
    }
}

pub struct Pipeline {
    client: SourceClient,
    dedup: TwoTierDedup,
    review: ReviewLog,
    writer: BatchWriter,
    signals: Arc<SignalStage>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        client: SourceClient,
        dedup: TwoTierDedup,
        review: ReviewLog,
        writer: BatchWriter,
        alerts: Arc<dyn AlertSink>,
        config: PipelineConfig,
    ) -> Self {
        let signals = Arc::new(SignalStage::new(alerts));
        let writer = writer.with_observer(signals.clone());
        Self {
            client,
            dedup,
            review,
            writer,
            signals,
            config,
        }
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn signals_raised(&self) -> usize {
        self.signals.raised()
    }

    /// New filings for `entity`: discovered, not under review, not buffered,
    /// not already stored.
    pub async fn new_filings(
        &self,
        entity: &EntityId,
    ) -> Result<(usize, Vec<FilingIdentity>), PipelineError> {
        let discovered = self
            .client
            .discover(entity, &self.config.form_type, self.config.max_candidates)
            .await?;
        let found = discovered.filings.len();

        let reviewed = self.review.accessions().await?;
        let buffered = self.writer.pending_accessions();
        let candidates: Vec<FilingIdentity> = discovered
            .filings
            .into_iter()
            .filter(|f| !reviewed.contains(&f.accession) && !buffered.contains(&f.accession))
            .collect();
        let fresh = self.dedup.filter_new(candidates).await?;
        Ok((found, fresh))
    }

    /// Ingest every new filing for one entity, one at a time.
    ///
    /// A filing that fails transiently is counted and skipped; only a full
    /// write buffer aborts the entity.
    pub async fn process_entity(
        &mut self,
        entity: &EntityId,
    ) -> Result<EntityReport, PipelineError> {
        let (discovered, fresh) = self.new_filings(entity).await?;
        let mut report = EntityReport {
            discovered,
            new: fresh.len(),
            ..EntityReport::default()
        };

        for filing in &fresh {
            match self.process_filing(filing).await {
                Ok(outcome) => report.tally(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(accession = %filing.accession, error = %e, "filing failed; left for redelivery");
                    report.failed += 1;
                }
            }
        }

        info!(
            entity = %entity,
            discovered = report.discovered,
            new = report.new,
            rows = report.rows,
            "entity processed"
        );
        Ok(report)
    }

    pub async fn process_filing(
        &mut self,
        filing: &FilingIdentity,
    ) -> Result<FilingOutcome, PipelineError> {
        let document = match self.client.fetch_document(filing).await {
            Ok(doc) => doc,
            Err(e @ FetchError::Unparseable { .. }) => {
                error!(accession = %filing.accession, error = %e, "filing unparseable");
                self.flag(filing, ReviewReason::NoPayload, Some(e.to_string()))
                    .await?;
                return Ok(FilingOutcome::Unparseable);
            }
            Err(e) => return Err(e.into()),
        };

        let parsed = Extractor::default().extract(&document.payload);
        if parsed.transactions.is_empty() {
            warn!(
                accession = %filing.accession,
                rejected = parsed.rejected_blocks,
                "no transactions extracted"
            );
            self.flag(filing, ReviewReason::NoTransactions, None).await?;
            if let Some(index) = self.dedup.index() {
                put_best_effort(index.as_ref(), &[DedupEntry::for_filing(filing)]).await;
            }
            return Ok(FilingOutcome::NoTransactions);
        }

        let records = TransactionRecord::for_filing(
            filing,
            parsed.issuer.trading_symbol.as_deref(),
            parsed.transactions,
            Utc::now(),
        );
        let rows = records.len();

        self.writer.add(records).await?;
        info!(accession = %filing.accession, rows, "filing ingested");
        Ok(FilingOutcome::Ingested { rows })
    }

    async fn flag(
        &self,
        filing: &FilingIdentity,
        reason: ReviewReason,
        detail: Option<String>,
    ) -> Result<(), StoreError> {
        self.review
            .record(&ReviewEntry {
                accession: filing.accession.clone(),
                entity_id: filing.entity_id.clone(),
                form_type: filing.form_type.clone(),
                reason,
                detail,
                logged_at: Utc::now(),
            })
            .await
    }

    pub async fn flush_if_due(&mut self) -> Result<Option<FlushReport>, StoreError> {
        self.writer.flush_if_due().await
    }

    /// Final flush before exit.
    pub async fn drain(&mut self) -> Result<FlushReport, StoreError> {
        self.writer.drain().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{CountingAlerts, FlakySink, pipeline, purchase};
    use insiderflow_store::BatchConfig;
    use tempfile::TempDir;

    #[test]
    fn only_buffer_overflow_is_fatal() {
        let overflow = PipelineError::Store(StoreError::BufferOverflow { cap: 5_000 });
        assert!(overflow.is_fatal());
        assert!(!overflow.is_retryable());

        let throttled = PipelineError::Fetch(FetchError::Throttled {
            url: "u".into(),
            attempts: 3,
        });
        assert!(!throttled.is_fatal());
        assert!(throttled.is_retryable());

        let io = PipelineError::Store(StoreError::Other("disk".into()));
        assert!(!io.is_fatal());
        assert!(io.is_retryable());
    }

    #[test]
    fn report_tallies_outcomes() {
        let mut report = EntityReport::default();
        report.tally(FilingOutcome::Ingested { rows: 3 });
        report.tally(FilingOutcome::NoTransactions);
        report.tally(FilingOutcome::Unparseable);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.rows, 3);
        assert_eq!(report.empty, 1);
        assert_eq!(report.unparseable, 1);
    }

    #[tokio::test]
    async fn alerts_wait_for_a_durable_flush() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(FlakySink::default());
        sink.broken.store(true, Ordering::SeqCst);
        let alerts = Arc::new(CountingAlerts::default());
        let writer = BatchWriter::new(
            sink.clone(),
            BatchConfig {
                max_records: 1,
                ..BatchConfig::default()
            },
        );
        let mut pipeline = pipeline(dir.path(), writer, alerts.clone());

        // 10,000 shares at $150 clears the signal floor.
        let added = pipeline
            .writer
            .add(vec![purchase("0000320193-25-000002", 10_000, 150.0)])
            .await
            .unwrap();
        assert!(added.is_none());
        assert_eq!(alerts.count(), 0);
        assert_eq!(pipeline.signals_raised(), 0);

        sink.broken.store(false, Ordering::SeqCst);
        pipeline.drain().await.unwrap();
        assert_eq!(alerts.count(), 1);
        assert_eq!(pipeline.signals_raised(), 1);
        assert_eq!(sink.writes().len(), 1);
    }

    #[test]
    fn signal_stage_ignores_small_and_non_purchase_records() {
        let alerts = Arc::new(CountingAlerts::default());
        let stage = SignalStage::new(alerts.clone());
        let mut sale = purchase("0000320193-25-000003", 10_000, 150.0);
        sale.transaction.transaction_type = insiderflow_core::TransactionType::Sale;
        stage.flushed(&[purchase("0000320193-25-000002", 10, 1.0), sale]);
        assert_eq!(alerts.count(), 0);
        assert_eq!(stage.raised(), 0);
    }
}
