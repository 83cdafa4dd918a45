use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} for {url}")]
    Server { status: u16, url: String },

    #[error("rate limited by upstream on {url} after {attempts} attempts")]
    Throttled { url: String, attempts: u32 },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no usable payload for {accession} after trying {tried} candidate URLs")]
    Unparseable { accession: String, tried: usize },

    #[error(transparent)]
    Core(#[from] insiderflow_core::CoreError),
}

impl FetchError {
    /// Transient failures the upstream queue should redeliver.
    ///
    /// Unparseable documents and client errors are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Server { status, .. } => *status >= 500,
            Self::Throttled { .. } => true,
            Self::Json(_) | Self::Unparseable { .. } | Self::Core(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(
            FetchError::Throttled {
                url: "u".into(),
                attempts: 2
            }
            .is_retryable()
        );
        assert!(
            FetchError::Server {
                status: 503,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(
            !FetchError::Server {
                status: 404,
                url: "u".into()
            }
            .is_retryable()
        );
        assert!(
            !FetchError::Unparseable {
                accession: "a".into(),
                tried: 4
            }
            .is_retryable()
        );
    }
}
