//! Ownership-document extractor.
//!
//! Turns the markup payload of a Form 3/4/5 style filing into
//! [`InsiderTransaction`]s. The input is not assumed to be schema-valid:
//! namespace prefixes are stripped first, every lookup is by tag name, and
//! a bad field only affects its own block.
//!
//! Per block the rules are:
//!
//! - shares of exactly zero reject the block (derivative blocks first fall
//!   back to the underlying-security share count);
//! - a missing price is 0, which is accepted;
//! - dates outside 1995..=2028 or not `YYYY-MM-DD` are replaced by the
//!   processing date;
//! - total value is never read from the source.

pub mod dates;
pub mod markup;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{EntityId, InsiderTransaction, OwnershipNature, TransactionTable, TransactionType};
use dates::{DateCheck, first_date_token, validate_date};
use markup::{Element, element_inner, elements, extract_field, parse_number, strip_namespaces};

const NON_DERIVATIVE_BLOCK: &str = "nonDerivativeTransaction";
const DERIVATIVE_BLOCK: &str = "derivativeTransaction";

/// The filer company as declared in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub cik: Option<String>,
    pub name: Option<String>,
    pub trading_symbol: Option<String>,
}

/// The individual on whose behalf the filing is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingParty {
    pub name: Option<String>,
    /// 10-digit zero-padded id.
    pub id: Option<String>,
    pub officer_title: Option<String>,
    pub relation: String,
}

/// Everything extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub document_type: Option<String>,
    pub issuer: Issuer,
    pub reporting_party: ReportingParty,
    /// In document order.
    pub transactions: Vec<InsiderTransaction>,
    /// Blocks dropped because their share count was zero or missing.
    pub rejected_blocks: usize,
    /// Accepted transactions whose date was replaced by the processing date.
    pub substituted_dates: usize,
}

/// Extracts transactions relative to a fixed processing date.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    processing_date: NaiveDate,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(Utc::now().date_naive())
    }
}

impl Extractor {
    pub fn new(processing_date: NaiveDate) -> Self {
        Self { processing_date }
    }

    pub fn processing_date(&self) -> NaiveDate {
        self.processing_date
    }

    /// Extract every transaction from a document payload.
    ///
    /// Zero transactions is a valid result.
    pub fn extract(&self, payload: &str) -> ParsedDocument {
        let text = strip_namespaces(payload);
        let text = text.as_ref();

        let issuer = extract_issuer(text);
        let reporting_party = extract_reporting_party(text);

        let mut found: Vec<(usize, TransactionTable, Element<'_>)> =
            elements(text, NON_DERIVATIVE_BLOCK)
                .into_iter()
                .map(|el| (el.offset, TransactionTable::NonDerivative, el))
                .chain(
                    elements(text, DERIVATIVE_BLOCK)
                        .into_iter()
                        .map(|el| (el.offset, TransactionTable::Derivative, el)),
                )
                .collect();
        found.sort_by_key(|(offset, _, _)| *offset);

        let mut transactions = Vec::with_capacity(found.len());
        let mut rejected_blocks = 0;
        let mut substituted_dates = 0;

        for (offset, table, el) in found {
            match self.parse_block(el.inner, table, &reporting_party) {
                Some((tx, check)) => {
                    if check.was_substituted() {
                        substituted_dates += 1;
                        let raw = block_date_raw(el.inner).unwrap_or_default();
                        warn!(
                            offset,
                            raw = %raw,
                            substituted = %check.date(),
                            "transaction date invalid or out of range; using processing date"
                        );
                    }
                    transactions.push(tx);
                }
                None => {
                    rejected_blocks += 1;
                    debug!(offset, ?table, "dropped block with zero shares");
                }
            }
        }

        ParsedDocument {
            document_type: extract_field(text, "documentType"),
            issuer,
            reporting_party,
            transactions,
            rejected_blocks,
            substituted_dates,
        }
    }

    fn parse_block(
        &self,
        block: &str,
        table: TransactionTable,
        party: &ReportingParty,
    ) -> Option<(InsiderTransaction, DateCheck)> {
        let shares = block_shares(block, table)?;

        let price = extract_field(block, "transactionPricePerShare")
            .and_then(|raw| parse_number(&raw))
            .map(f64::abs)
            .unwrap_or(0.0);

        let code = extract_field(block, "transactionCode")
            .and_then(|raw| raw.chars().find(|c| c.is_ascii_alphabetic()))
            .map(|c| c.to_ascii_uppercase().to_string())
            .unwrap_or_default();

        let acquired = extract_field(block, "transactionAcquiredDisposedCode");
        let date_check = validate_date(block_date_token(block).as_deref(), self.processing_date);

        let tx = InsiderTransaction {
            insider_name: party.name.clone().unwrap_or_default(),
            insider_id: party.id.clone(),
            insider_title: party.officer_title.clone(),
            relation: party.relation.clone(),
            transaction_type: TransactionType::from_code(&code),
            transaction_code: code,
            table,
            shares,
            price_per_share: price,
            transaction_date: date_check.date(),
            security_title: extract_field(block, "securityTitle"),
            ownership_nature: OwnershipNature::from_acquired_disposed(acquired.as_deref()),
        };
        Some((tx, date_check))
    }
}

/// Share count for a block, or `None` when it is zero or missing.
fn block_shares(block: &str, table: TransactionTable) -> Option<i64> {
    let read = |tag: &str| {
        extract_field(block, tag)
            .and_then(|raw| parse_number(&raw))
            .map(|v| v.abs().round() as i64)
            .unwrap_or(0)
    };
    let mut shares = read("transactionShares");
    if shares == 0 && table == TransactionTable::Derivative {
        shares = read("underlyingSecurityShares");
    }
    (shares > 0).then_some(shares)
}

fn block_date_raw(block: &str) -> Option<String> {
    extract_field(block, "transactionDate")
}

/// First date-shaped token inside the transaction date element,
/// with or without a `<value>` wrapper.
fn block_date_token(block: &str) -> Option<String> {
    let inner = element_inner(block, "transactionDate")?;
    first_date_token(inner).map(str::to_string)
}

fn extract_issuer(text: &str) -> Issuer {
    let scope = element_inner(text, "issuer").unwrap_or(text);
    Issuer {
        cik: extract_field(scope, "issuerCik")
            .and_then(|raw| EntityId::parse(&raw).ok())
            .map(|id| id.padded().to_string()),
        name: extract_field(scope, "issuerName"),
        trading_symbol: extract_field(scope, "issuerTradingSymbol"),
    }
}

fn is_set(scope: &str, tag: &str) -> bool {
    extract_field(scope, tag)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "y" | "yes"))
        .unwrap_or(false)
}

/// Identity of the first reporting owner. Multi-owner filings report the
/// same transactions once, so later owners are not separate insiders here.
fn extract_reporting_party(text: &str) -> ReportingParty {
    let owner = element_inner(text, "reportingOwner").unwrap_or(text);
    let rel = element_inner(owner, "reportingOwnerRelationship").unwrap_or(owner);

    let mut roles = Vec::new();
    if is_set(rel, "isDirector") {
        roles.push("Director");
    }
    if is_set(rel, "isOfficer") {
        roles.push("Officer");
    }
    if is_set(rel, "isTenPercentOwner") {
        roles.push("10% Owner");
    }
    if is_set(rel, "isOther") {
        roles.push("Other");
    }
    let relation = if roles.is_empty() {
        "Unknown".to_string()
    } else {
        roles.join(", ")
    };

    ReportingParty {
        name: extract_field(owner, "rptOwnerName"),
        id: extract_field(owner, "rptOwnerCik")
            .and_then(|raw| EntityId::parse(&raw).ok())
            .map(|id| id.padded().to_string()),
        officer_title: extract_field(rel, "officerTitle"),
        relation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn extract(doc: &str) -> ParsedDocument {
        Extractor::new(processing_date()).extract(doc)
    }

    const HEADER: &str = r#"
        <documentType>4</documentType>
        <issuer>
            <issuerCik>0000320193</issuerCik>
            <issuerName>Example Corp</issuerName>
            <issuerTradingSymbol>EXMP</issuerTradingSymbol>
        </issuer>
        <reportingOwner>
            <reportingOwnerId>
                <rptOwnerCik>1214156</rptOwnerCik>
                <rptOwnerName>Doe Jane</rptOwnerName>
            </reportingOwnerId>
            <reportingOwnerRelationship>
                <isDirector>0</isDirector>
                <isOfficer>1</isOfficer>
                <officerTitle>EVP &amp; Chief Financial Officer</officerTitle>
            </reportingOwnerRelationship>
        </reportingOwner>"#;

    fn non_derivative(code: &str, shares: &str, price: &str, date: &str) -> String {
        format!(
            r#"<nonDerivativeTransaction>
                <securityTitle><value>Common Stock</value></securityTitle>
                <transactionDate><value>{date}</value></transactionDate>
                <transactionCoding><transactionCode>{code}</transactionCode></transactionCoding>
                <transactionAmounts>
                    <transactionShares><value>{shares}</value></transactionShares>
                    <transactionPricePerShare><value>{price}</value></transactionPricePerShare>
                    <transactionAcquiredDisposedCode><value>A</value></transactionAcquiredDisposedCode>
                </transactionAmounts>
            </nonDerivativeTransaction>"#
        )
    }

    fn derivative(code: &str, shares: &str, underlying: &str, date: &str) -> String {
        format!(
            r#"<derivativeTransaction>
                <securityTitle><value>Stock Option</value></securityTitle>
                <transactionDate><value>{date}</value></transactionDate>
                <transactionCoding><transactionCode>{code}</transactionCode></transactionCoding>
                <transactionAmounts>
                    <transactionShares><value>{shares}</value></transactionShares>
                    <transactionPricePerShare><footnoteId id="F1"/></transactionPricePerShare>
                    <transactionAcquiredDisposedCode><value>D</value></transactionAcquiredDisposedCode>
                </transactionAmounts>
                <underlyingSecurity>
                    <underlyingSecurityTitle><value>Common Stock</value></underlyingSecurityTitle>
                    <underlyingSecurityShares><value>{underlying}</value></underlyingSecurityShares>
                </underlyingSecurity>
            </derivativeTransaction>"#
        )
    }

    fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><ownershipDocument>{HEADER}
            <nonDerivativeTable>{body}</nonDerivativeTable></ownershipDocument>"#
        )
    }

    /// Add an `x:` prefix to every start and end tag.
    fn prefixed(doc: &str) -> String {
        let mut out = String::with_capacity(doc.len() * 2);
        let mut chars = doc.chars().peekable();
        while let Some(c) = chars.next() {
            out.push(c);
            if c == '<' {
                match chars.peek() {
                    Some('/') => {
                        out.push('/');
                        chars.next();
                        out.push_str("x:");
                    }
                    Some(n) if n.is_ascii_alphabetic() => out.push_str("x:"),
                    _ => {}
                }
            }
        }
        out
    }

    #[test]
    fn namespaced_purchase_and_grant() {
        let body = format!(
            "{}{}",
            non_derivative("P", "1000", "10.00", "2025-06-02"),
            derivative("A", "500", "500", "2025-06-02")
        );
        let parsed = extract(&prefixed(&document(&body)));

        assert_eq!(parsed.transactions.len(), 2);
        let purchase = &parsed.transactions[0];
        let grant = &parsed.transactions[1];

        assert_eq!(purchase.transaction_type.label(), "Purchase");
        assert_eq!(purchase.shares, 1000);
        assert_eq!(purchase.total_value(), 10_000.0);
        assert_eq!(purchase.ownership_nature, OwnershipNature::Direct);
        assert_eq!(purchase.table, TransactionTable::NonDerivative);

        assert_eq!(grant.transaction_type.label(), "Grant");
        assert_eq!(grant.shares, 500);
        assert_eq!(grant.price_per_share, 0.0);
        assert_eq!(grant.total_value(), 0.0);
        assert_eq!(grant.ownership_nature, OwnershipNature::Indirect);
        assert_eq!(grant.table, TransactionTable::Derivative);

        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert!(parsed.transactions.iter().all(|t| t.transaction_date == date));
    }

    #[test]
    fn prefixes_do_not_change_results() {
        let body = format!(
            "{}{}{}",
            non_derivative("S", "2,500", "187.25", "2024-11-29"),
            derivative("M", "0", "1200", "2024-11-29"),
            non_derivative("G", "0", "0", "2024-11-30"),
        );
        let plain = extract(&document(&body));
        let ns = extract(&prefixed(&document(&body)));
        assert_eq!(plain, ns);
        assert_eq!(plain.transactions.len(), 2);
    }

    #[test]
    fn identity_extracted_once() {
        let parsed = extract(&document(&non_derivative("P", "1", "1", "2025-01-02")));
        let party = &parsed.reporting_party;
        assert_eq!(party.name.as_deref(), Some("Doe Jane"));
        assert_eq!(party.id.as_deref(), Some("0001214156"));
        assert_eq!(
            party.officer_title.as_deref(),
            Some("EVP & Chief Financial Officer")
        );
        assert_eq!(party.relation, "Officer");
        assert_eq!(parsed.issuer.trading_symbol.as_deref(), Some("EXMP"));
        assert_eq!(parsed.issuer.cik.as_deref(), Some("0000320193"));
        assert_eq!(parsed.document_type.as_deref(), Some("4"));

        let tx = &parsed.transactions[0];
        assert_eq!(tx.insider_name, "Doe Jane");
        assert_eq!(tx.insider_title.as_deref(), Some("EVP & Chief Financial Officer"));
    }

    #[test]
    fn zero_share_blocks_are_dropped() {
        let body = format!(
            "{}{}{}",
            non_derivative("P", "0", "10", "2025-01-02"),
            derivative("A", "0", "0", "2025-01-02"),
            non_derivative("S", "5", "10", "2025-01-02"),
        );
        let parsed = extract(&document(&body));
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.rejected_blocks, 2);
        assert_eq!(parsed.transactions[0].transaction_type, TransactionType::Sale);
    }

    #[test]
    fn derivative_falls_back_to_underlying_shares() {
        let parsed = extract(&document(&derivative("M", "0", "7500", "2025-01-02")));
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.transactions[0].shares, 7500);
    }

    #[test]
    fn non_derivative_never_uses_underlying_fallback() {
        let block = non_derivative("P", "0", "1", "2025-01-02").replace(
            "</transactionAmounts>",
            "</transactionAmounts><underlyingSecurityShares><value>9</value></underlyingSecurityShares>",
        );
        assert!(extract(&document(&block)).transactions.is_empty());
    }

    #[test]
    fn source_value_field_is_ignored() {
        let block = non_derivative("P", "300", "2.5", "2025-01-02").replace(
            "</transactionAmounts>",
            "<transactionTotalValue><value>999999</value></transactionTotalValue></transactionAmounts>",
        );
        let parsed = extract(&document(&block));
        assert_eq!(parsed.transactions[0].total_value(), 750.0);
    }

    #[test]
    fn ancient_date_replaced_by_processing_date() {
        let parsed = extract(&document(&non_derivative("P", "100", "12.5", "1975-01-01")));
        assert_eq!(parsed.transactions.len(), 1);
        let tx = &parsed.transactions[0];
        assert_eq!(tx.transaction_date, processing_date());
        assert_eq!(tx.shares, 100);
        assert_eq!(tx.price_per_share, 12.5);
        assert_eq!(parsed.substituted_dates, 1);
    }

    #[test]
    fn date_without_value_wrapper_and_with_offset() {
        let block = non_derivative("P", "1", "1", "unused").replace(
            "<transactionDate><value>unused</value></transactionDate>",
            "<transactionDate>2023-07-14-04:00</transactionDate>",
        );
        let parsed = extract(&document(&block));
        assert_eq!(
            parsed.transactions[0].transaction_date,
            NaiveDate::from_ymd_opt(2023, 7, 14).unwrap()
        );
        assert_eq!(parsed.substituted_dates, 0);
    }

    #[test]
    fn unmapped_code_passes_through() {
        let parsed = extract(&document(&non_derivative("W", "10", "1", "2025-01-02")));
        assert_eq!(parsed.transactions[0].transaction_type.label(), "Other(W)");
    }

    #[test]
    fn empty_document_is_not_an_error() {
        let parsed = extract("<ownershipDocument></ownershipDocument>");
        assert!(parsed.transactions.is_empty());
        assert_eq!(parsed.reporting_party.relation, "Unknown");
    }

    #[test]
    fn malformed_block_does_not_void_siblings() {
        let doc = format!(
            "<ownershipDocument>{HEADER}<nonDerivativeTransaction><transactionShares><value>oops</value></nonDerivativeTransaction>{}</ownershipDocument>",
            non_derivative("P", "40", "2", "2025-01-02")
        );
        let parsed = extract(&doc);
        assert_eq!(parsed.transactions.len(), 1);
        assert_eq!(parsed.transactions[0].shares, 40);
        assert_eq!(parsed.rejected_blocks, 1);
    }
}
