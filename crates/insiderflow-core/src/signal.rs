//! High-conviction signal filter.
//!
//! A pure function over a batch of records: open-market purchases above a
//! value floor, scored 5–10. The result only gates the alert collaborator.

use tracing::info;

use crate::{TransactionRecord, TransactionType};

/// Purchases at or below this value are ignored.
pub const MIN_SIGNAL_VALUE: f64 = 50_000.0;

const BASE_SCORE: u8 = 5;
const MAX_SCORE: u8 = 10;

/// Title or relation fragments that mark a senior insider (lowercase).
const SENIOR_ROLE_KEYWORDS: &[&str] = &[
    "ceo",
    "chief executive",
    "cfo",
    "chief financial",
    "coo",
    "chief operating",
    "president",
    "chairman",
    "chair",
    "founder",
];

/// A record selected for alerting with its conviction score.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal<'a> {
    pub record: &'a TransactionRecord,
    pub score: u8,
}

fn is_senior(record: &TransactionRecord) -> bool {
    let tx = &record.transaction;
    let haystack = format!(
        "{} {}",
        tx.insider_title.as_deref().unwrap_or_default(),
        tx.relation
    )
    .to_ascii_lowercase();
    SENIOR_ROLE_KEYWORDS.iter().any(|kw| haystack.contains(kw))
}

/// Score a qualifying record: base 5, +3 senior role, +2 over $1M, +1 over $500k, capped at 10.
pub fn score(record: &TransactionRecord) -> u8 {
    let value = record.transaction.total_value();
    let mut score = BASE_SCORE;
    if is_senior(record) {
        score += 3;
    }
    if value > 1_000_000.0 {
        score += 2;
    }
    if value > 500_000.0 {
        score += 1;
    }
    score.min(MAX_SCORE)
}

/// Keep purchases worth more than [`MIN_SIGNAL_VALUE`], in input order.
pub fn select_signals(records: &[TransactionRecord]) -> Vec<Signal<'_>> {
    records
        .iter()
        .filter(|r| {
            r.transaction.transaction_type == TransactionType::Purchase
                && r.transaction.total_value() > MIN_SIGNAL_VALUE
        })
        .map(|record| Signal {
            record,
            score: score(record),
        })
        .collect()
}

/// Receives selected signals. Delivery (chat, webhooks) lives outside this crate.
pub trait AlertSink: Send + Sync {
    fn alert(&self, signals: &[Signal<'_>]);
}

/// Writes each signal as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, signals: &[Signal<'_>]) {
        for s in signals {
            let tx = &s.record.transaction;
            info!(
                score = s.score,
                accession = %s.record.accession,
                symbol = s.record.issuer_symbol.as_deref().unwrap_or("?"),
                insider = %tx.insider_name,
                title = tx.insider_title.as_deref().unwrap_or(""),
                shares = tx.shares,
                value = tx.total_value(),
                "insider purchase signal"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AccessionNumber, EntityId, FilingIdentity, InsiderTransaction, OwnershipNature,
        TransactionTable,
    };
    use chrono::{NaiveDate, Utc};

    fn record(code: &str, shares: i64, price: f64, title: Option<&str>) -> TransactionRecord {
        let filing = FilingIdentity {
            entity_id: EntityId::parse("789019").unwrap(),
            accession: AccessionNumber::parse("0001062993-25-000001").unwrap(),
            form_type: "4".into(),
            filing_date: None,
            primary_document: None,
        };
        let tx = InsiderTransaction {
            insider_name: "Roe Rick".into(),
            insider_id: None,
            insider_title: title.map(str::to_string),
            relation: "Director".into(),
            transaction_type: TransactionType::from_code(code),
            transaction_code: code.into(),
            table: TransactionTable::NonDerivative,
            shares,
            price_per_share: price,
            transaction_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            security_title: None,
            ownership_nature: OwnershipNature::Direct,
        };
        TransactionRecord::for_filing(&filing, None, vec![tx], Utc::now())
            .pop()
            .unwrap()
    }

    #[test]
    fn only_large_purchases_pass() {
        let records = vec![
            record("P", 1_000, 50.0, None),
            record("P", 1_000, 50.01, None),
            record("S", 100_000, 50.0, None),
            record("A", 100_000, 0.0, None),
        ];
        let signals = select_signals(&records);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].record.transaction.price_per_share, 50.01);
        assert_eq!(signals[0].score, 5);
    }

    #[test]
    fn senior_role_adds_three() {
        let r = record("P", 2_000, 50.0, Some("Chief Executive Officer"));
        assert_eq!(score(&r), 8);
    }

    #[test]
    fn value_tiers_stack() {
        assert_eq!(score(&record("P", 10_000, 60.0, None)), 6);
        assert_eq!(score(&record("P", 10_000, 101.0, None)), 8);
    }

    #[test]
    fn score_is_capped_at_ten() {
        let r = record("P", 100_000, 20.0, Some("President & CEO"));
        assert_eq!(score(&r), 10);
    }
}
