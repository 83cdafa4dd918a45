//! DuckDB-backed bulk scan over the partitioned Parquet files.

use std::collections::HashSet;
use std::sync::Mutex;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use duckdb::Connection;
use insiderflow_core::AccessionNumber;
use insiderflow_core::filings::{ACCESSION_COLUMN, string_column};
use tracing::debug;

use crate::dedup::BulkScan;
use crate::{ParquetStore, StoreError};

/// Pushes the accession filter down into DuckDB instead of reading the
/// whole column into memory.
pub struct DuckScan {
    conn: Mutex<Connection>,
    store: ParquetStore,
}

impl DuckScan {
    /// Scan `store` through an in-memory DuckDB database.
    pub fn open(store: ParquetStore) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            store,
        })
    }

    fn query(&self, keys: &[AccessionNumber]) -> Result<Vec<String>, StoreError> {
        let files = self.store.all_files()?;
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let file_list = files
            .iter()
            .map(|f| format!("'{}'", f.display().to_string().replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT {ACCESSION_COLUMN} FROM read_parquet([{file_list}]) \
             WHERE {ACCESSION_COLUMN} IN ({placeholders})"
        );

        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Other("duckdb connection poisoned".into()))?;
        let mut stmt = conn.prepare(&sql)?;
        let batches: Vec<RecordBatch> = stmt
            .query_arrow(duckdb::params_from_iter(keys.iter().map(|k| k.as_str())))?
            .collect();
        debug!(files = files.len(), keys = keys.len(), "duckdb accession scan");
        Ok(batches
            .iter()
            .flat_map(|b| string_column(b, ACCESSION_COLUMN))
            .collect())
    }
}

#[async_trait]
impl BulkScan for DuckScan {
    async fn existing(
        &self,
        keys: &[AccessionNumber],
    ) -> Result<HashSet<AccessionNumber>, StoreError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let found: HashSet<String> = self.query(keys)?.into_iter().collect();
        Ok(keys
            .iter()
            .filter(|k| found.contains(k.as_str()))
            .cloned()
            .collect())
    }
}
