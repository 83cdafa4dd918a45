//! Append-only JSONL log of filings that need manual review.
//!
//! Filings land here when no candidate document yields a payload or when a
//! payload yields no transactions. Discovery treats logged accessions as
//! already handled so they are not refetched every poll.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use insiderflow_core::{AccessionNumber, EntityId};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::StoreError;

pub const REVIEW_DIR: &str = "_review";
pub const REVIEW_FILE: &str = "unparseable.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// No candidate URL produced an ownership payload.
    NoPayload,
    /// A payload was found but held no usable transaction.
    NoTransactions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub accession: AccessionNumber,
    pub entity_id: EntityId,
    pub form_type: String,
    pub reason: ReviewReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub logged_at: DateTime<Utc>,
}

pub struct ReviewLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ReviewLog {
    /// Review log under `{root}/_review/unparseable.jsonl`.
    pub fn under(root: &Path) -> Self {
        Self::at(root.join(REVIEW_DIR).join(REVIEW_FILE))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, entry: &ReviewEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        info!(accession = %entry.accession, reason = ?entry.reason, "filing logged for review");
        Ok(())
    }

    pub async fn entries(&self) -> Result<Vec<ReviewEntry>, StoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %self.path.display(), error = %e, "skipping bad review line"),
            }
        }
        Ok(entries)
    }

    /// Accessions already logged, for exclusion from discovery.
    pub async fn accessions(&self) -> Result<HashSet<AccessionNumber>, StoreError> {
        Ok(self.entries().await?.into_iter().map(|e| e.accession).collect())
    }
}
