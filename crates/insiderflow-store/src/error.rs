use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parquet file not found: {0}")]
    ParquetNotFound(std::path::PathBuf),

    #[error("batch of {got} exceeds the per-call limit of {limit}")]
    BatchTooLarge { limit: usize, got: usize },

    #[error("write buffer would exceed its hard cap of {cap} records")]
    BufferOverflow { cap: usize },

    #[error("dedup index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("failed to write partition {partition}: {source}")]
    PartitionWrite {
        partition: String,
        #[source]
        source: Box<StoreError>,
    },

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] insiderflow_core::CoreError),

    #[error("{0}")]
    Other(String),
}
