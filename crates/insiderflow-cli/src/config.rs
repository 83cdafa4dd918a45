//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use insiderflow_core::filings::TRANSACTIONS_TABLE;
use insiderflow_fetch::client::{DEFAULT_ARCHIVE_BASE_URL, DEFAULT_DATA_BASE_URL};
use insiderflow_fetch::{FetchConfig, RetryPolicy};
use insiderflow_store::BatchConfig;

#[derive(Debug, Parser)]
#[command(name = "insiderflow", version, about = "Insider-transaction filing ingestion")]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, env = "INSIDERFLOW_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover and ingest filings for the given entities.
    Ingest(IngestArgs),
    /// Parse a local filing document and print its transactions.
    Extract(ExtractArgs),
    /// List stored partitions with file and row counts.
    Partitions(StoreArgs),
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Root directory for partitioned output, the review log and the index file.
    #[arg(long, env = "INSIDERFLOW_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "INSIDERFLOW_TABLE", default_value = TRANSACTIONS_TABLE)]
    pub table: String,
}

#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    /// Entity ids (CIKs). Read one per line from stdin when none are given.
    pub entities: Vec<String>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Descriptive client header with a contact address, required by the source.
    #[arg(long, env = "INSIDERFLOW_USER_AGENT")]
    pub user_agent: String,

    #[arg(long, env = "INSIDERFLOW_DATA_BASE_URL", default_value = DEFAULT_DATA_BASE_URL)]
    pub data_base_url: String,

    #[arg(long, env = "INSIDERFLOW_ARCHIVE_BASE_URL", default_value = DEFAULT_ARCHIVE_BASE_URL)]
    pub archive_base_url: String,

    /// Minimum spacing between upstream requests.
    #[arg(long, env = "INSIDERFLOW_REQUEST_INTERVAL_MS", default_value_t = 110)]
    pub request_interval_ms: u64,

    #[arg(long, env = "INSIDERFLOW_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "INSIDERFLOW_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    /// Pause before the first retry after a 429.
    #[arg(long, env = "INSIDERFLOW_THROTTLE_PAUSE_MS", default_value_t = 10_000)]
    pub throttle_pause_ms: u64,

    /// Pause before later retries.
    #[arg(long, env = "INSIDERFLOW_ESCALATED_PAUSE_MS", default_value_t = 60_000)]
    pub escalated_pause_ms: u64,

    #[arg(long, env = "INSIDERFLOW_MAX_CANDIDATES", default_value_t = insiderflow_fetch::DEFAULT_MAX_CANDIDATES)]
    pub max_candidates: usize,

    #[arg(long, env = "INSIDERFLOW_FORM_TYPE", default_value = "4")]
    pub form_type: String,

    #[arg(long, env = "INSIDERFLOW_FLUSH_RECORDS", default_value_t = insiderflow_store::writer::DEFAULT_MAX_RECORDS)]
    pub flush_records: usize,

    #[arg(long, env = "INSIDERFLOW_FLUSH_AGE_SECS", default_value_t = 30)]
    pub flush_age_secs: u64,

    #[arg(long, env = "INSIDERFLOW_BUFFER_CAP", default_value_t = insiderflow_store::writer::DEFAULT_HARD_CAP)]
    pub buffer_cap: usize,

    /// Dedup index file; defaults to `{data_dir}/_index/dedup.jsonl`.
    #[arg(long, env = "INSIDERFLOW_INDEX_FILE")]
    pub index_file: Option<PathBuf>,

    /// Confirm index misses with DuckDB instead of reading Parquet directly.
    #[cfg(feature = "duckdb")]
    #[arg(long, env = "INSIDERFLOW_DUCKDB_SCAN")]
    pub duckdb_scan: bool,
}

impl IngestArgs {
    pub fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig::new(self.user_agent.clone());
        config.data_base_url = self.data_base_url.clone();
        config.archive_base_url = self.archive_base_url.clone();
        config.request_interval = Duration::from_millis(self.request_interval_ms);
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.retry = RetryPolicy {
            max_retries: self.max_retries,
            throttle_pause: Duration::from_millis(self.throttle_pause_ms),
            escalated_pause: Duration::from_millis(self.escalated_pause_ms),
        };
        config
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_records: self.flush_records,
            max_age: Duration::from_secs(self.flush_age_secs),
            hard_cap: self.buffer_cap,
            ..BatchConfig::default()
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_file
            .clone()
            .unwrap_or_else(|| self.store.data_dir.join("_index").join("dedup.jsonl"))
    }
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    /// Raw submission text (`.txt`), ownership XML, or a rendered page.
    pub path: PathBuf,

    /// Accession number to stamp on printed records.
    #[arg(long)]
    pub accession: Option<String>,

    /// Print the parsed document as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}
