//! Error types for dynres

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Backing store access failure
    #[error("Store error at '{path}': {reason}")]
    Store { path: String, reason: String },

    /// Declaration node is missing required configuration
    #[error("Invalid declaration at '{path}': {reason}")]
    InvalidDeclaration { path: String, reason: String },

    /// Provider handle is unknown or already unregistered
    #[error("Unknown provider handle: {0}")]
    UnknownHandle(u64),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a store failure
    pub fn store(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Store {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a declaration failure
    pub fn declaration(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDeclaration {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
