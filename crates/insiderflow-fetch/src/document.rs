//! Filing document retrieval.
//!
//! A filing's ownership payload can live in several places depending on the
//! era it was filed in. Candidates are tried in priority order and the first
//! one that both downloads and yields an ownership document wins.

use insiderflow_core::FilingIdentity;
use insiderflow_core::extract::markup::{OWNERSHIP_ROOT, has_ownership_root, strip_namespaces};
use tracing::{debug, info, warn};

use crate::{FetchError, SourceClient};

/// Rendering directories the source has used for ownership forms over time.
const LEGACY_RENDER_DIRS: &[&str] = &["xslF345X05", "xslF345X04", "xslF345X03", "xslF345X02"];

/// Name used when nothing better is known.
const GENERIC_DOCUMENT: &str = "form4.xml";

/// Retries of the same URL after a 429 before moving to the next candidate.
const SAME_URL_RETRIES: u32 = 1;

/// A downloaded filing payload. Lives for one parse call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFilingDocument {
    pub source_url: String,
    pub payload: String,
}

fn archive_dir(archive_base: &str, filing: &FilingIdentity) -> String {
    format!(
        "{}/Archives/edgar/data/{}/{}",
        archive_base,
        filing.entity_id.unpadded(),
        filing.accession.undashed()
    )
}

/// Candidate URLs for a filing's payload, most reliable first, without duplicates.
pub fn candidate_urls(archive_base: &str, filing: &FilingIdentity) -> Vec<String> {
    let dir = archive_dir(archive_base, filing);
    let mut urls = vec![format!("{dir}/{}.txt", filing.accession)];

    let primary = filing
        .primary_document
        .as_deref()
        .map(|d| d.trim_start_matches('/'));
    let primary_name = primary.map(|d| d.rsplit('/').next().unwrap_or(d));

    if let Some(doc) = primary {
        // A rendered path such as `xslF345X05/form4.xml` wraps the raw file of the same name.
        if let Some(name) = primary_name
            && name != doc
        {
            urls.push(format!("{dir}/{name}"));
        }
        urls.push(format!("{dir}/{doc}"));
    }

    let legacy_name = primary_name.unwrap_or(GENERIC_DOCUMENT);
    for render_dir in LEGACY_RENDER_DIRS {
        urls.push(format!("{dir}/{render_dir}/{legacy_name}"));
    }
    urls.push(format!("{dir}/{GENERIC_DOCUMENT}"));

    let mut seen = std::collections::HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
    urls
}

/// Content between the first `<XML>` / `</XML>` sentinel pair that holds an
/// ownership document. Case-insensitive.
fn between_sentinels(body: &str) -> Option<&str> {
    let lower = body.to_ascii_lowercase();
    let mut pos = 0;
    while let Some(rel) = lower[pos..].find("<xml>") {
        let start = pos + rel + "<xml>".len();
        let end = start + lower[start..].find("</xml>")?;
        let section = body[start..end].trim();
        if has_ownership_root(section) {
            return Some(section);
        }
        pos = end + "</xml>".len();
    }
    None
}

fn looks_like_markup_page(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(512)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.contains("<html")
}

/// Pull the ownership payload out of a downloaded body.
///
/// Raw submission text is cut at the sentinel tags; a full markup page is
/// searched for the root element; anything else is taken as-is. Returns
/// `None` when the result holds no ownership document.
pub fn extract_payload(source_url: &str, body: &str) -> Option<String> {
    let payload = if source_url.ends_with(".txt") {
        between_sentinels(body)?.to_string()
    } else if looks_like_markup_page(body) {
        let stripped = strip_namespaces(body);
        let open = format!("<{OWNERSHIP_ROOT}");
        let close = format!("</{OWNERSHIP_ROOT}>");
        let start = stripped.find(&open)?;
        let end = stripped.rfind(&close)? + close.len();
        if end <= start {
            return None;
        }
        stripped[start..end].to_string()
    } else {
        body.trim().to_string()
    };

    (!payload.is_empty() && has_ownership_root(&payload)).then_some(payload)
}

impl SourceClient {
    /// Download the ownership payload for `filing`.
    ///
    /// Returns [`FetchError::Unparseable`] when every candidate was reachable
    /// or permanently missing but none held a payload; such filings are not
    /// retried automatically. When every candidate failed transiently the
    /// last transient error is returned so the work item is redelivered.
    pub async fn fetch_document(
        &self,
        filing: &FilingIdentity,
    ) -> Result<RawFilingDocument, FetchError> {
        let candidates = candidate_urls(self.archive_base_url(), filing);
        let mut last_transient = None;
        let mut any_permanent = false;

        for url in &candidates {
            match self.get_text_with_retries(url, SAME_URL_RETRIES).await {
                Ok(body) => match extract_payload(url, &body) {
                    Some(payload) => {
                        info!(
                            accession = %filing.accession,
                            url = %url,
                            bytes = payload.len(),
                            "fetched filing document"
                        );
                        return Ok(RawFilingDocument {
                            source_url: url.clone(),
                            payload,
                        });
                    }
                    None => {
                        any_permanent = true;
                        debug!(url = %url, "no ownership payload in candidate");
                    }
                },
                Err(e) if e.is_retryable() => {
                    warn!(url = %url, error = %e, "candidate failed transiently");
                    last_transient = Some(e);
                }
                Err(e) => {
                    any_permanent = true;
                    debug!(url = %url, error = %e, "candidate unavailable");
                }
            }
        }

        match last_transient {
            Some(e) if !any_permanent => Err(e),
            _ => Err(FetchError::Unparseable {
                accession: filing.accession.to_string(),
                tried: candidates.len(),
            }),
        }
    }
}
