//! Identifier normalisation for filers and filings.
//!
//! The source system identifies filers by a numeric entity id (CIK) that is
//! zero-padded to 10 digits in most feeds but unpadded in archive paths, and
//! filings by an accession number written either dashed
//! (`0001234567-25-000123`) or as 18 bare digits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A filer's entity identifier, stored zero-padded to 10 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parse `"320193"`, `"0000320193"` or `"CIK0000320193"` into a padded id.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let s = raw.trim();
        let s = s
            .strip_prefix("CIK")
            .or_else(|| s.strip_prefix("cik"))
            .unwrap_or(s);
        if s.is_empty() || s.len() > 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidEntityId(raw.to_string()));
        }
        Ok(Self(format!("{s:0>10}")))
    }

    /// The 10-digit zero-padded form used by the submissions feed.
    pub fn padded(&self) -> &str {
        &self.0
    }

    /// The unpadded form used in archive paths (`"0000320193"` → `"320193"`).
    pub fn unpadded(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() { "0" } else { trimmed }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

/// A filing's accession number, stored in dashed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessionNumber(String);

impl AccessionNumber {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let digits: String = raw.trim().chars().filter(|c| *c != '-').collect();
        if digits.len() != 18 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidAccession(raw.to_string()));
        }
        Ok(Self(format!(
            "{}-{}-{}",
            &digits[..10],
            &digits[10..12],
            &digits[12..]
        )))
    }

    /// Dashed form, e.g. `0001234567-25-000123`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Undashed form used as the archive directory name.
    pub fn undashed(&self) -> String {
        self.0.replace('-', "")
    }
}

impl fmt::Display for AccessionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessionNumber {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessionNumber> for String {
    fn from(value: AccessionNumber) -> Self {
        value.0
    }
}
