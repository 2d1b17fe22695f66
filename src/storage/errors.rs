use thiserror::Error;

/// Errors raised while loading, normalizing or merging sensor data.
///
/// An empty fetch is not an error: adapters return an empty [`Dataset`](super::Dataset).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether the next refresh tick may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::IoError(_))
    }
}
