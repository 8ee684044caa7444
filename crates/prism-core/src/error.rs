use thiserror::Error;

/// Top-level error type for the Prism store.
///
/// Absence is never an error here: searching an empty store, deleting an
/// unknown record or looking up an unknown entity all return empty results.
/// Only malformed input and genuine I/O or data corruption surface as
/// `PrismError`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PrismError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for PrismError {
    fn from(err: toml::de::Error) -> Self {
        PrismError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PrismError {
    fn from(err: toml::ser::Error) -> Self {
        PrismError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PrismError {
    fn from(err: serde_json::Error) -> Self {
        PrismError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Prism operations.
pub type Result<T> = std::result::Result<T, PrismError>;
