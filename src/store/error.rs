//! Errors raised by document store backends

use std::fmt;
use thiserror::Error;

/// Error type for document store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed document does not exist
    #[error("document not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or is refusing work
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but refused the request (permissions, constraint, bad batch)
    #[error("request rejected (status {status}): {message}")]
    Rejected {
        status: u16,
        message: String,
    },

    /// A document did not match the schema expected by the caller
    #[error("malformed document {id}: {reason}")]
    Malformed {
        id: String,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl StoreError {
    pub fn not_found<T: fmt::Display>(path: T) -> Self {
        StoreError::NotFound(path.to_string())
    }

    pub fn unavailable<T: fmt::Display>(msg: T) -> Self {
        StoreError::Unavailable(msg.to_string())
    }

    pub fn malformed<I: fmt::Display, R: fmt::Display>(id: I, reason: R) -> Self {
        StoreError::Malformed {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}
