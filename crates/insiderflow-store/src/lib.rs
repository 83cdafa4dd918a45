//! Storage layer: partitioned Parquet sink, batch write buffer, two-tier dedup,
//! and the review log.

mod error;
pub use error::StoreError;

pub mod dedup;
pub mod partition;
pub mod review;
pub mod writer;

pub use dedup::{BulkScan, DedupIndex, LocalIndex, ParquetScan, TwoTierDedup};
pub use partition::{ParquetStore, PartitionSink, read_parquet};
pub use review::{ReviewEntry, ReviewLog, ReviewReason};
pub use writer::{BatchConfig, BatchWriter, FlushObserver, FlushReport};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckScan;

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{NaiveDate, Utc};
    use insiderflow_core::{
        AccessionNumber, EntityId, FilingIdentity, InsiderTransaction, OwnershipNature,
        TransactionRecord, TransactionTable, TransactionType,
    };

    /// One purchase record for `accession` at `position`, dated `date` (YYYY-MM-DD).
    pub fn record(accession: &str, position: u32, date: &str) -> TransactionRecord {
        let accession = AccessionNumber::parse(accession).unwrap();
        let filing = FilingIdentity {
            entity_id: EntityId::parse("320193").unwrap(),
            accession,
            form_type: "4".into(),
            filing_date: None,
            primary_document: None,
        };
        let tx = InsiderTransaction {
            insider_name: "Doe Jane".into(),
            insider_id: Some("0001234567".into()),
            insider_title: Some("CFO".into()),
            relation: "Officer".into(),
            transaction_type: TransactionType::Purchase,
            transaction_code: "P".into(),
            table: TransactionTable::NonDerivative,
            shares: 100,
            price_per_share: 10.0,
            transaction_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            security_title: Some("Common Stock".into()),
            ownership_nature: OwnershipNature::Direct,
        };
        let mut record = TransactionRecord::for_filing(&filing, Some("AAPL"), vec![tx], Utc::now())
            .pop()
            .unwrap();
        record.position = position;
        record
    }
}
