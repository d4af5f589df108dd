//! Error types for the pillbox_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pillbox_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input: bad interval, bad tablet count, bad date
    #[error("Validation error: {0}")]
    Validation(String),

    /// A calendar or box the caller asked for does not exist in the store
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Data store failure other than plain IO (lock, persist, corrupt document)
    #[error("Store error: {0}")]
    Store(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn calendar_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "Calendar",
            id: id.to_string(),
        }
    }

    pub fn box_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "Medicine box",
            id: id.to_string(),
        }
    }

    /// True for the not-found case, so callers can tell it apart from IO failures
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
