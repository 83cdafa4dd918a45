//! Hive-partitioned Parquet storage for insider transactions.
//!
//! Layout: `{root}/{table}/year={Y}/month={M}/part-*.parquet`. Each flush
//! group becomes one new file, written to a temp file in the partition
//! directory and renamed into place so readers never see a partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use insiderflow_core::Partition;
use insiderflow_core::schema::filings::{ACCESSION_COLUMN, TRANSACTIONS_TABLE};
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{debug, info};

use crate::StoreError;

/// Destination for one partition's worth of flushed rows.
#[async_trait]
pub trait PartitionSink: Send + Sync {
    /// Durably write `batch` as a new file under `partition`. Returns the file path.
    async fn write_partition(
        &self,
        partition: Partition,
        batch: RecordBatch,
    ) -> Result<PathBuf, StoreError>;
}

/// Local-filesystem partitioned Parquet store. Clones share the file sequence.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    table: String,
    seq: Arc<AtomicU64>,
}

impl ParquetStore {
    /// Store rooted at `root` using the default transactions table name.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_table(root, TRANSACTIONS_TABLE)
    }

    pub fn with_table(root: impl Into<PathBuf>, table: &str) -> Self {
        Self {
            root: root.into(),
            table: table.to_string(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_dir(&self) -> PathBuf {
        self.root.join(&self.table)
    }

    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.table_dir().join(partition.path_segment())
    }

    fn next_file_name(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "part-{}-{}-{seq:06}.parquet",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            std::process::id()
        )
    }

    /// Blocking write of one batch to a fresh file in the partition.
    pub fn write_batch(
        &self,
        partition: Partition,
        batch: &RecordBatch,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.partition_dir(partition);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(self.next_file_name());

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut tmp = tempfile::Builder::new()
            .prefix(".inflight-")
            .suffix(".parquet")
            .tempfile_in(&dir)?;
        {
            let mut writer = ArrowWriter::try_new(tmp.as_file_mut(), batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        debug!(partition = %partition, rows = batch.num_rows(), path = %path.display(), "wrote partition file");
        Ok(path)
    }

    /// Partitions present on disk, oldest first.
    pub fn list_partitions(&self) -> Result<Vec<Partition>, StoreError> {
        let table_dir = self.table_dir();
        if !table_dir.exists() {
            return Ok(Vec::new());
        }
        let mut partitions = Vec::new();
        for year_entry in std::fs::read_dir(&table_dir)? {
            let year_entry = year_entry?;
            let Some(year) = hive_value(&year_entry.path(), "year") else {
                continue;
            };
            for month_entry in std::fs::read_dir(year_entry.path())? {
                let month_entry = month_entry?;
                if let Some(month) = hive_value(&month_entry.path(), "month")
                    && (1..=12).contains(&month)
                {
                    partitions.push(Partition {
                        year: year as i32,
                        month: month as u32,
                    });
                }
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    /// Completed Parquet files in one partition. In-flight temp files are skipped.
    pub fn partition_files(&self, partition: Partition) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.partition_dir(partition);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_complete_parquet(p))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Every completed file across all partitions.
    pub fn all_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for partition in self.list_partitions()? {
            files.extend(self.partition_files(partition)?);
        }
        Ok(files)
    }

    /// Read every row in a year/month partition.
    pub fn read_partition(&self, year: i32, month: u32) -> Result<Vec<RecordBatch>, StoreError> {
        let mut batches = Vec::new();
        for file in self.partition_files(Partition { year, month })? {
            batches.extend(read_parquet(&file)?);
        }
        Ok(batches)
    }

    /// All accession numbers stored so far, read from the accession column only.
    pub fn scan_accessions(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let files = self.all_files()?;
        for file in &files {
            out.extend(read_string_column(file, ACCESSION_COLUMN)?);
        }
        info!(files = files.len(), rows = out.len(), "scanned accession column");
        Ok(out)
    }
}

#[async_trait]
impl PartitionSink for ParquetStore {
    async fn write_partition(
        &self,
        partition: Partition,
        batch: RecordBatch,
    ) -> Result<PathBuf, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write_batch(partition, &batch))
            .await
            .map_err(|e| StoreError::Other(format!("partition writer task failed: {e}")))?
    }
}

fn hive_value(path: &Path, key: &str) -> Option<i64> {
    if !path.is_dir() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(key)?.strip_prefix('=')?.parse().ok()
}

fn is_complete_parquet(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "parquet")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.starts_with('.'))
}

/// Read all record batches from a Parquet file.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::ParquetNotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

fn read_string_column(path: &Path, column: &str) -> Result<Vec<String>, StoreError> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let mask = ProjectionMask::columns(builder.parquet_schema(), [column]);
    let reader = builder.with_projection(mask).build()?;
    let mut values = Vec::new();
    for batch in reader {
        values.extend(insiderflow_core::filings::string_column(&batch?, column));
    }
    Ok(values)
}
