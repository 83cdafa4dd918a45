//! Subcommand implementations.

use std::sync::Arc;

use anyhow::Context;
use arrow::util::pretty::pretty_format_batches;
use chrono::Utc;
use insiderflow_core::filings::records_to_batch;
use insiderflow_core::{
    AccessionNumber, EntityId, Extractor, FilingIdentity, LogAlertSink, TransactionRecord,
};
use insiderflow_fetch::{SourceClient, extract_payload};
use insiderflow_store::{
    BatchWriter, BulkScan, DedupIndex, LocalIndex, ParquetScan, ParquetStore, ReviewLog,
    TwoTierDedup,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{ExtractArgs, IngestArgs, StoreArgs};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::worker::{WorkerReport, run_worker};

const QUEUE_DEPTH: usize = 64;

fn bulk_scan(args: &IngestArgs, store: ParquetStore) -> anyhow::Result<Arc<dyn BulkScan>> {
    #[cfg(feature = "duckdb")]
    if args.duckdb_scan {
        return Ok(Arc::new(insiderflow_store::DuckScan::open(store)?));
    }
    let _ = args;
    Ok(Arc::new(ParquetScan::new(store)))
}

/// Wire up the full pipeline from configuration.
pub async fn build_pipeline(args: &IngestArgs) -> anyhow::Result<Pipeline> {
    let client = SourceClient::new(&args.fetch_config()).context("building HTTP client")?;
    let store = ParquetStore::with_table(&args.store.data_dir, &args.store.table);

    let index: Arc<dyn DedupIndex> = Arc::new(
        LocalIndex::open(args.index_path())
            .await
            .context("opening dedup index")?,
    );
    let dedup = TwoTierDedup::new(Some(Arc::clone(&index)), bulk_scan(args, store.clone())?);
    let writer = BatchWriter::new(Arc::new(store), args.batch_config()).with_index(index);
    let review = ReviewLog::under(&args.store.data_dir);

    Ok(Pipeline::new(
        client,
        dedup,
        review,
        writer,
        Arc::new(LogAlertSink),
        PipelineConfig {
            form_type: args.form_type.clone(),
            max_candidates: args.max_candidates,
        },
    ))
}

fn parse_entity(raw: &str) -> Option<EntityId> {
    match EntityId::parse(raw) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(input = %raw, error = %e, "skipping invalid entity id");
            None
        }
    }
}

/// Feed entity ids into the queue from arguments, or from stdin when there are none.
fn spawn_feeder(entities: Vec<String>, tx: mpsc::Sender<EntityId>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !entities.is_empty() {
            for id in entities.iter().filter_map(|e| parse_entity(e)) {
                if tx.send(id).await.is_err() {
                    return;
                }
            }
            return;
        }
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some(id) = parse_entity(line)
                        && tx.send(id).await.is_err()
                    {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    return;
                }
            }
        }
    })
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

pub async fn ingest(args: IngestArgs) -> anyhow::Result<WorkerReport> {
    let mut pipeline = build_pipeline(&args).await?;
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    let feeder = spawn_feeder(args.entities.clone(), tx);

    let report = run_worker(&mut pipeline, rx, ctrl_c()).await?;
    feeder.abort();

    let t = &report.totals;
    println!(
        "entities={} discovered={} new={} ingested={} rows={} signals={} empty={} unparseable={} failed={}",
        report.entities,
        t.discovered,
        t.new,
        t.ingested,
        t.rows,
        report.signals,
        t.empty,
        t.unparseable,
        report.failed.len()
    );
    Ok(report)
}

pub fn extract(args: &ExtractArgs) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let source = args.path.display().to_string();
    let payload = extract_payload(&source, &body).context("no ownership document found")?;
    let parsed = Extractor::default().extract(&payload);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }

    info!(
        transactions = parsed.transactions.len(),
        rejected = parsed.rejected_blocks,
        substituted_dates = parsed.substituted_dates,
        "parsed document"
    );
    if parsed.transactions.is_empty() {
        println!("no transactions");
        return Ok(());
    }

    let cik = parsed.issuer.cik.as_deref().unwrap_or("0");
    let entity = EntityId::parse(cik).or_else(|_| EntityId::parse("0"))?;
    let accession = match &args.accession {
        Some(raw) => AccessionNumber::parse(raw)?,
        None => AccessionNumber::parse("0000000000-00-000000")?,
    };
    let filing = FilingIdentity {
        entity_id: entity,
        accession,
        form_type: parsed.document_type.clone().unwrap_or_else(|| "4".into()),
        filing_date: None,
        primary_document: None,
    };
    let records = TransactionRecord::for_filing(
        &filing,
        parsed.issuer.trading_symbol.as_deref(),
        parsed.transactions,
        Utc::now(),
    );
    let batch = records_to_batch(&records)?;
    println!("{}", pretty_format_batches(&[batch])?);
    Ok(())
}

pub fn partitions(args: &StoreArgs) -> anyhow::Result<Vec<(String, usize, usize)>> {
    let store = ParquetStore::with_table(&args.data_dir, &args.table);
    let mut rows_out = Vec::new();
    for partition in store.list_partitions()? {
        let files = store.partition_files(partition)?.len();
        let rows: usize = store
            .read_partition(partition.year, partition.month)?
            .iter()
            .map(|b| b.num_rows())
            .sum();
        println!("{}  files={files}  rows={rows}", partition.path_segment());
        rows_out.push((partition.path_segment(), files, rows));
    }
    if rows_out.is_empty() {
        println!("no partitions under {}", store.table_dir().display());
    }
    Ok(rows_out)
}
