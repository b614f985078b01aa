use thiserror::Error;

/// Errors surfaced by the query layer.
#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AtlasResult<T> = std::result::Result<T, AtlasError>;
