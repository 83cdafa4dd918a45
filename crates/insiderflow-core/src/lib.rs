pub mod error;
pub mod extract;
pub mod filing;
pub mod ids;
pub mod schema;
pub mod signal;

pub use error::CoreError;
pub use extract::{Extractor, Issuer, ParsedDocument, ReportingParty};
pub use filing::{
    DedupEntry, FilingIdentity, InsiderTransaction, OwnershipNature, Partition,
    TransactionRecord, TransactionTable, TransactionType,
};
pub use ids::{AccessionNumber, EntityId};
pub use schema::filings;
pub use signal::{AlertSink, LogAlertSink, Signal, select_signals};
