use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Earliest accepted transaction year.
pub const MIN_YEAR: i32 = 1995;
/// Latest accepted transaction year.
pub const MAX_YEAR: i32 = 2028;

static DATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date regex"));

/// Outcome of validating one source date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateCheck {
    Valid(NaiveDate),
    /// The source value was unusable; the processing date stands in.
    Substituted(NaiveDate),
}

impl DateCheck {
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Valid(d) | Self::Substituted(d) => *d,
        }
    }

    pub fn was_substituted(&self) -> bool {
        matches!(self, Self::Substituted(_))
    }
}

/// First `YYYY-MM-DD` token in `text`.
pub fn first_date_token(text: &str) -> Option<&str> {
    DATE_TOKEN.find(text).map(|m| m.as_str())
}

/// Parse a strict `YYYY-MM-DD` value, allowing a time or offset suffix.
///
/// `2025-06-02`, `2025-06-02T10:00:00Z` and `2025-06-02-05:00` are accepted;
/// `06/02/2025` is not.
pub fn parse_source_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10)?;
    let suffix = &raw[10..];
    if !suffix.is_empty() && !suffix.starts_with(['T', 't', ' ', '-', '+', 'Z']) {
        return None;
    }
    let b = head.as_bytes();
    let shape_ok = b.iter().enumerate().all(|(i, c)| match i {
        4 | 7 => *c == b'-',
        _ => c.is_ascii_digit(),
    });
    if !shape_ok {
        return None;
    }
    let year: i32 = head[..4].parse().ok()?;
    let month: u32 = head[5..7].parse().ok()?;
    let day: u32 = head[8..10].parse().ok()?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Validate a source date, substituting `today` when it is missing,
/// malformed, out of range, or not a real calendar day.
pub fn validate_date(raw: Option<&str>, today: NaiveDate) -> DateCheck {
    match raw.and_then(parse_source_date) {
        Some(date) => DateCheck::Valid(date),
        None => DateCheck::Substituted(today),
    }
}
