//! Filing discovery.
//!
//! The primary path reads the entity's submissions feed, whose "recent"
//! section is a set of parallel arrays correlated by index. When that
//! fails the older Atom browse feed is parsed instead. The fallback's
//! entry order is whatever the feed returns; callers must not rely on it.

use std::sync::LazyLock;

use chrono::NaiveDate;
use insiderflow_core::extract::markup::{elements, extract_field};
use insiderflow_core::{AccessionNumber, EntityId, FilingIdentity};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{FetchError, SourceClient};

/// Default number of candidate filings returned per entity.
pub const DEFAULT_MAX_CANDIDATES: usize = 40;

static ACCESSION_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{10}-\d{2}-\d{6}").expect("accession regex"));

static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*"([^"]+)""#).expect("href regex"));

static CATEGORY_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<category[^>]*\bterm\s*=\s*"([^"]+)""#).expect("term regex"));

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

/// Which path produced a discovery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Submissions,
    BrowseFeed,
}

#[derive(Debug, Clone)]
pub struct Discovered {
    pub source: DiscoverySource,
    /// Newest first when `source` is `Submissions`; feed order otherwise.
    pub filings: Vec<FilingIdentity>,
}

/// `4` matches `4` and its amendment `4/A`.
fn form_matches(form: &str, wanted: &str) -> bool {
    let form = form.trim();
    form.eq_ignore_ascii_case(wanted)
        || form
            .strip_suffix("/A")
            .is_some_and(|base| base.eq_ignore_ascii_case(wanted))
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    raw.trim()
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn correlate(
    recent: &RecentFilings,
    entity: &EntityId,
    form_type: &str,
    limit: usize,
) -> Vec<FilingIdentity> {
    let mut out: Vec<FilingIdentity> = recent
        .accession_number
        .iter()
        .enumerate()
        .filter_map(|(i, raw_acc)| {
            let form = recent.form.get(i)?;
            if !form_matches(form, form_type) {
                return None;
            }
            let accession = match AccessionNumber::parse(raw_acc) {
                Ok(a) => a,
                Err(e) => {
                    debug!(index = i, error = %e, "skipping malformed accession");
                    return None;
                }
            };
            Some(FilingIdentity {
                entity_id: entity.clone(),
                accession,
                form_type: form.trim().to_string(),
                filing_date: recent.filing_date.get(i).and_then(|d| parse_day(d)),
                primary_document: recent
                    .primary_document
                    .get(i)
                    .map(|d| d.trim())
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            })
        })
        .collect();
    // Stable: equal dates keep feed order. Undated entries sort last.
    out.sort_by(|a, b| b.filing_date.cmp(&a.filing_date));
    out.truncate(limit);
    out
}

fn parse_browse_feed(
    body: &str,
    entity: &EntityId,
    form_type: &str,
    limit: usize,
) -> Vec<FilingIdentity> {
    let mut out = Vec::new();
    for entry in elements(body, "entry") {
        let e = entry.inner;

        let form = extract_field(e, "filing-type")
            .or_else(|| CATEGORY_TERM.captures(e).map(|c| c[1].to_string()))
            .or_else(|| {
                extract_field(e, "title")
                    .and_then(|t| t.split(" - ").next().map(|s| s.trim().to_string()))
            });
        let Some(form) = form else { continue };
        if !form_matches(&form, form_type) {
            continue;
        }

        // The feed has shipped this element under a misspelled name too.
        let accession = extract_field(e, "accession-number")
            .or_else(|| extract_field(e, "accession-nunber"))
            .or_else(|| {
                HREF.captures(e)
                    .and_then(|c| ACCESSION_IN_TEXT.find(&c[1]).map(|m| m.as_str().to_string()))
            })
            .and_then(|raw| AccessionNumber::parse(&raw).ok());
        let Some(accession) = accession else {
            debug!("skipping feed entry without accession number");
            continue;
        };

        let filing_date = extract_field(e, "filing-date")
            .or_else(|| extract_field(e, "updated"))
            .and_then(|d| parse_day(&d));

        out.push(FilingIdentity {
            entity_id: entity.clone(),
            accession,
            form_type: form,
            filing_date,
            primary_document: None,
        });
        if out.len() >= limit {
            break;
        }
    }
    out
}

impl SourceClient {
    fn submissions_url(&self, entity: &EntityId) -> String {
        format!(
            "{}/submissions/CIK{}.json",
            self.data_base_url(),
            entity.padded()
        )
    }

    fn browse_feed_url(&self, entity: &EntityId, form_type: &str, limit: usize) -> String {
        format!(
            "{}/cgi-bin/browse-edgar?action=getcompany&CIK={}&type={}&dateb=&owner=include&count={}&output=atom",
            self.archive_base_url(),
            entity.padded(),
            form_type,
            limit
        )
    }

    /// Candidate filings from the submissions feed only.
    pub async fn discover_primary(
        &self,
        entity: &EntityId,
        form_type: &str,
        limit: usize,
    ) -> Result<Vec<FilingIdentity>, FetchError> {
        let url = self.submissions_url(entity);
        let submissions: Submissions = self.get_json(&url).await?;
        Ok(correlate(
            &submissions.filings.recent,
            entity,
            form_type,
            limit,
        ))
    }

    /// Candidate filings from the Atom browse feed only.
    pub async fn discover_fallback(
        &self,
        entity: &EntityId,
        form_type: &str,
        limit: usize,
    ) -> Result<Vec<FilingIdentity>, FetchError> {
        let url = self.browse_feed_url(entity, form_type, limit);
        let body = self.get_text(&url).await?;
        Ok(parse_browse_feed(&body, entity, form_type, limit))
    }

    /// Up to `limit` candidate filings of `form_type` for `entity`.
    ///
    /// Falls back to the browse feed when the submissions feed errors.
    pub async fn discover(
        &self,
        entity: &EntityId,
        form_type: &str,
        limit: usize,
    ) -> Result<Discovered, FetchError> {
        match self.discover_primary(entity, form_type, limit).await {
            Ok(filings) => {
                info!(entity = %entity, count = filings.len(), "discovered filings");
                Ok(Discovered {
                    source: DiscoverySource::Submissions,
                    filings,
                })
            }
            Err(primary) => {
                warn!(entity = %entity, error = %primary, "submissions feed failed; using browse feed");
                let filings = self.discover_fallback(entity, form_type, limit).await?;
                info!(entity = %entity, count = filings.len(), "discovered filings via browse feed");
                Ok(Discovered {
                    source: DiscoverySource::BrowseFeed,
                    filings,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchConfig, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entity() -> EntityId {
        EntityId::parse("320193").unwrap()
    }

    fn client(base: &str) -> SourceClient {
        let mut config = FetchConfig::new("insiderflow-test ops@example.com").with_base_url(base);
        config.request_interval = Duration::from_millis(1);
        config.retry = RetryPolicy {
            max_retries: 0,
            throttle_pause: Duration::from_millis(1),
            escalated_pause: Duration::from_millis(1),
        };
        SourceClient::new(&config).unwrap()
    }

    fn submissions_body() -> serde_json::Value {
        json!({
            "cik": "320193",
            "name": "Example Corp",
            "filings": {
                "recent": {
                    "accessionNumber": [
                        "0001140361-25-000010",
                        "0001140361-25-000009",
                        "0000320193-25-000070",
                        "0001140361-25-000007",
                        "not-an-accession"
                    ],
                    "filingDate": ["2025-06-04", "2025-06-01", "2025-05-30", "2025-05-02", "2025-05-01"],
                    "form": ["4", "4/A", "10-Q", "4", "4"],
                    "primaryDocument": ["xslF345X05/wk-form4_1.xml", "doc4a.xml", "q.htm", "", "x.xml"]
                },
                "files": []
            }
        })
    }

    const FEED: &str = r#"<?xml version="1.0" encoding="ISO-8859-1" ?>
<feed xmlns="http://www.w3.org/2005/Atom">
<entry>
  <category label="form type" scheme="https://www.sec.gov/" term="4"/>
  <content type="text/xml">
    <accession-nunber>0001140361-25-000007</accession-nunber>
    <filing-date>2025-05-02</filing-date>
    <filing-type>4</filing-type>
  </content>
  <link href="https://www.sec.gov/Archives/edgar/data/320193/000114036125000007/0001140361-25-000007-index.htm" rel="alternate" type="text/html"/>
  <title>4  - Statement of changes in beneficial ownership of securities</title>
  <updated>2025-05-02T16:30:11-04:00</updated>
</entry>
<entry>
  <link href="https://www.sec.gov/Archives/edgar/data/320193/000114036125000010/0001140361-25-000010-index.htm"/>
  <title>4 - Statement of changes</title>
  <updated>2025-06-04T18:00:00-04:00</updated>
</entry>
<entry>
  <category term="8-K"/>
  <content><accession-number>0000320193-25-000071</accession-number></content>
  <title>8-K - Current report</title>
</entry>
</feed>"#;

    #[test]
    fn correlates_parallel_arrays() {
        let recent: RecentFilings =
            serde_json::from_value(submissions_body()["filings"]["recent"].clone()).unwrap();
        let filings = correlate(&recent, &entity(), "4", 10);

        let accs: Vec<&str> = filings.iter().map(|f| f.accession.as_str()).collect();
        assert_eq!(
            accs,
            vec![
                "0001140361-25-000010",
                "0001140361-25-000009",
                "0001140361-25-000007"
            ]
        );
        assert_eq!(filings[0].primary_document.as_deref(), Some("xslF345X05/wk-form4_1.xml"));
        assert_eq!(filings[1].form_type, "4/A");
        assert_eq!(filings[2].primary_document, None);
        assert_eq!(filings[0].filing_date, NaiveDate::from_ymd_opt(2025, 6, 4));
    }

    #[test]
    fn correlate_respects_limit_and_newest_first() {
        let recent = RecentFilings {
            accession_number: vec![
                "0000000001-24-000001".into(),
                "0000000001-25-000001".into(),
                "0000000001-23-000001".into(),
            ],
            filing_date: vec!["2024-01-01".into(), "2025-01-01".into(), "2023-01-01".into()],
            form: vec!["4".into(), "4".into(), "4".into()],
            primary_document: vec![],
        };
        let filings = correlate(&recent, &entity(), "4", 2);
        assert_eq!(filings.len(), 2);
        assert_eq!(filings[0].accession.as_str(), "0000000001-25-000001");
        assert_eq!(filings[1].accession.as_str(), "0000000001-24-000001");
    }

    #[test]
    fn correlate_tolerates_short_arrays() {
        let recent = RecentFilings {
            accession_number: vec!["0000000001-24-000001".into(), "0000000001-24-000002".into()],
            filing_date: vec![],
            form: vec!["4".into()],
            primary_document: vec![],
        };
        let filings = correlate(&recent, &entity(), "4", 10);
        assert_eq!(filings.len(), 1);
        assert_eq!(filings[0].filing_date, None);
    }

    #[test]
    fn parses_browse_feed_entries() {
        let filings = parse_browse_feed(FEED, &entity(), "4", 10);
        assert_eq!(filings.len(), 2);
        assert_eq!(filings[0].accession.as_str(), "0001140361-25-000007");
        assert_eq!(filings[0].filing_date, NaiveDate::from_ymd_opt(2025, 5, 2));
        assert_eq!(filings[1].accession.as_str(), "0001140361-25-000010");
        assert_eq!(filings[1].form_type, "4");
        assert_eq!(filings[1].filing_date, NaiveDate::from_ymd_opt(2025, 6, 4));
    }

    #[test]
    fn form_filter_includes_amendments_only_of_same_form() {
        assert!(form_matches("4", "4"));
        assert!(form_matches("4/A", "4"));
        assert!(!form_matches("424B2", "4"));
        assert!(!form_matches("10-Q", "4"));
    }

    #[tokio::test]
    async fn primary_path_used_when_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/submissions/CIK0000320193.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(submissions_body()))
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server.uri())
            .discover(&entity(), "4", 10)
            .await
            .unwrap();
        assert_eq!(found.source, DiscoverySource::Submissions);
        assert_eq!(found.filings.len(), 3);
    }

    #[tokio::test]
    async fn falls_back_to_browse_feed_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/submissions/CIK0000320193.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/browse-edgar"))
            .and(query_param("CIK", "0000320193"))
            .and(query_param("output", "atom"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server.uri())
            .discover(&entity(), "4", 10)
            .await
            .unwrap();
        assert_eq!(found.source, DiscoverySource::BrowseFeed);
        assert_eq!(found.filings.len(), 2);
    }

    #[tokio::test]
    async fn malformed_submissions_json_also_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/submissions/CIK0000320193.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"filings\": 7}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cgi-bin/browse-edgar"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let found = client(&server.uri())
            .discover(&entity(), "4", 1)
            .await
            .unwrap();
        assert_eq!(found.source, DiscoverySource::BrowseFeed);
        assert_eq!(found.filings.len(), 1);
    }

    #[tokio::test]
    async fn both_paths_failing_surfaces_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .discover(&entity(), "4", 10)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
