//! Single-consumer worker loop.
//!
//! Work items are processed strictly one at a time so the shared rate gate
//! and the write buffer are never touched concurrently. While idle the loop
//! wakes for the buffer's flush deadline. On shutdown or end of input it
//! drains the buffer before returning.

use std::future::Future;

use insiderflow_core::EntityId;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{error, info, warn};

use crate::pipeline::{EntityReport, Pipeline, PipelineError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub entities: usize,
    pub totals: EntityReport,
    /// Alerts raised from flushed records.
    pub signals: usize,
    /// Items that failed and should be redelivered by the upstream queue.
    pub failed: Vec<EntityId>,
}

impl WorkerReport {
    fn absorb(&mut self, r: EntityReport) {
        let t = &mut self.totals;
        t.discovered += r.discovered;
        t.new += r.new;
        t.ingested += r.ingested;
        t.rows += r.rows;
        t.empty += r.empty;
        t.unparseable += r.unparseable;
        t.failed += r.failed;
    }
}

/// Run until `queue` closes or `shutdown` resolves, then drain.
///
/// Returns an error only for conditions that must stop the process: a full
/// write buffer or a failed final flush.
pub async fn run_worker<F>(
    pipeline: &mut Pipeline,
    mut queue: mpsc::Receiver<EntityId>,
    shutdown: F,
) -> Result<WorkerReport, PipelineError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut report = WorkerReport::default();

    let stopped = loop {
        let deadline = pipeline.writer().deadline();
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown requested; draining");
                break Ok(());
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Err(e) = pipeline.flush_if_due().await {
                    warn!(error = %e, "timed flush failed; records retained");
                }
            }

            item = queue.recv() => {
                let Some(entity) = item else {
                    info!("work queue closed; draining");
                    break Ok(());
                };
                report.entities += 1;
                match pipeline.process_entity(&entity).await {
                    Ok(r) => report.absorb(r),
                    Err(e) if e.is_fatal() => {
                        error!(entity = %entity, error = %e, "fatal pipeline error");
                        break Err(e);
                    }
                    Err(e) => {
                        warn!(entity = %entity, error = %e, retryable = e.is_retryable(), "work item failed");
                        report.failed.push(entity);
                    }
                }
            }
        }
    };

    let drained = pipeline.drain().await;
    report.signals = pipeline.signals_raised();
    stopped?;
    let flushed = drained?;
    info!(
        entities = report.entities,
        rows = report.totals.rows,
        final_flush_rows = flushed.rows,
        failed = report.failed.len(),
        "worker stopped"
    );
    Ok(report)
}
