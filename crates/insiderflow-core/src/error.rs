use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid entity id {0:?}: expected 1-10 ASCII digits")]
    InvalidEntityId(String),

    #[error("invalid accession number {0:?}")]
    InvalidAccession(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}
