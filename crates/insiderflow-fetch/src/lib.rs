//! Fetch layer: rate-gated HTTP client, filing discovery, and document retrieval.

pub mod client;
pub mod discovery;
pub mod document;
mod error;
pub mod gate;

pub use client::{FetchConfig, SourceClient};
pub use discovery::{DEFAULT_MAX_CANDIDATES, Discovered, DiscoverySource};
pub use document::{RawFilingDocument, candidate_urls, extract_payload};
pub use error::FetchError;
pub use gate::{RateGate, RetryPolicy};
