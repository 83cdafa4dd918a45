//! Filing and transaction types shared by discovery, extraction, and storage.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccessionNumber, EntityId};

/// Value above which a stored row is flagged as an alert.
pub const ALERT_VALUE_THRESHOLD: f64 = 1_000_000.0;

/// Lookup type recorded on every dedup entry.
pub const LOOKUP_TYPE_ACCESSION: &str = "accession→filing";

/// One filing as reported by discovery. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingIdentity {
    pub entity_id: EntityId,
    pub accession: AccessionNumber,
    pub form_type: String,
    pub filing_date: Option<NaiveDate>,
    pub primary_document: Option<String>,
}

impl FilingIdentity {
    /// Internal filing id: entity plus undashed accession.
    ///
    /// The same accession can be discovered through the issuer and through
    /// each reporting owner, so the accession alone is the dedup key and this
    /// id only names the rows written for one discovery path.
    pub fn filing_id(&self) -> String {
        format!("{}_{}", self.entity_id.padded(), self.accession.undashed())
    }
}

/// Normalised transaction type derived from the one-letter transaction code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Purchase,
    Sale,
    Exercise,
    Conversion,
    Grant,
    Gift,
    TaxPayment,
    Other,
    /// A code outside the fixed table, passed through verbatim.
    Unmapped(String),
}

impl TransactionType {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "P" => Self::Purchase,
            "S" => Self::Sale,
            "M" => Self::Exercise,
            "C" => Self::Conversion,
            "A" => Self::Grant,
            "G" => Self::Gift,
            "F" => Self::TaxPayment,
            "J" | "" => Self::Other,
            other => Self::Unmapped(other.to_string()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Purchase => "Purchase".into(),
            Self::Sale => "Sale".into(),
            Self::Exercise => "Exercise".into(),
            Self::Conversion => "Conversion".into(),
            Self::Grant => "Grant".into(),
            Self::Gift => "Gift".into(),
            Self::TaxPayment => "Tax Payment".into(),
            Self::Other => "Other".into(),
            Self::Unmapped(code) => format!("Other({code})"),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnershipNature {
    Direct,
    Indirect,
}

impl OwnershipNature {
    /// `A` (acquired) maps to direct; anything else, including a missing flag, to indirect.
    pub fn from_acquired_disposed(flag: Option<&str>) -> Self {
        match flag.map(|f| f.trim().to_ascii_uppercase()) {
            Some(f) if f == "A" => Self::Direct,
            _ => Self::Indirect,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Indirect => "Indirect",
        }
    }
}

/// Whether a transaction came from table I or table II of the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionTable {
    NonDerivative,
    Derivative,
}

/// One transaction extracted from an ownership document.
///
/// `total_value` is not a field: it is always recomputed from shares and price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderTransaction {
    pub insider_name: String,
    pub insider_id: Option<String>,
    pub insider_title: Option<String>,
    pub relation: String,
    pub transaction_type: TransactionType,
    pub transaction_code: String,
    pub table: TransactionTable,
    /// Always > 0.
    pub shares: i64,
    /// Always >= 0.
    pub price_per_share: f64,
    pub transaction_date: NaiveDate,
    pub security_title: Option<String>,
    pub ownership_nature: OwnershipNature,
}

impl InsiderTransaction {
    pub fn total_value(&self) -> f64 {
        (self.shares as f64 * self.price_per_share).abs()
    }
}

/// Year/month storage partition derived from a transaction date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    pub year: i32,
    pub month: u32,
}

impl Partition {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Relative directory under the table: `year=2025/month=6`.
    pub fn path_segment(&self) -> String {
        format!("year={}/month={}", self.year, self.month)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// A transaction ready for storage, carrying its filing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub entity_id: EntityId,
    pub filing_id: String,
    pub accession: AccessionNumber,
    pub form_type: String,
    pub filing_date: Option<NaiveDate>,
    pub issuer_symbol: Option<String>,
    /// Index of the transaction within its document, in document order.
    pub position: u32,
    pub transaction: InsiderTransaction,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build the records for one filing, numbering transactions in document order.
    pub fn for_filing(
        filing: &FilingIdentity,
        issuer_symbol: Option<&str>,
        transactions: Vec<InsiderTransaction>,
        created_at: DateTime<Utc>,
    ) -> Vec<Self> {
        transactions
            .into_iter()
            .enumerate()
            .map(|(i, transaction)| Self {
                entity_id: filing.entity_id.clone(),
                filing_id: filing.filing_id(),
                accession: filing.accession.clone(),
                form_type: filing.form_type.clone(),
                filing_date: filing.filing_date,
                issuer_symbol: issuer_symbol.map(str::to_string),
                position: i as u32,
                transaction,
                created_at,
            })
            .collect()
    }

    /// Stable unique key: the same filing re-ingested yields the same keys.
    pub fn record_key(&self) -> String {
        format!("{}:{}", self.accession, self.position)
    }

    pub fn is_alert(&self) -> bool {
        self.transaction.total_value() > ALERT_VALUE_THRESHOLD
    }

    pub fn partition(&self) -> Partition {
        Partition::of(self.transaction.transaction_date)
    }
}

/// Dedup index entry written after a filing's rows are durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub lookup_key: AccessionNumber,
    pub lookup_type: String,
    pub entity_id: EntityId,
    pub form_type: String,
    pub filing_id: String,
}

impl DedupEntry {
    pub fn for_filing(filing: &FilingIdentity) -> Self {
        Self {
            lookup_key: filing.accession.clone(),
            lookup_type: LOOKUP_TYPE_ACCESSION.to_string(),
            entity_id: filing.entity_id.clone(),
            form_type: filing.form_type.clone(),
            filing_id: filing.filing_id(),
        }
    }

    pub fn for_record(record: &TransactionRecord) -> Self {
        Self {
            lookup_key: record.accession.clone(),
            lookup_type: LOOKUP_TYPE_ACCESSION.to_string(),
            entity_id: record.entity_id.clone(),
            form_type: record.form_type.clone(),
            filing_id: record.filing_id.clone(),
        }
    }
}
