//! Error handling for the Sala Solidária client

use std::fmt;
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Unified error type for the Sala Solidária client
#[derive(Error, Debug)]
pub enum Error {
    /// The operation needs a signed-in user with a loaded profile
    #[error("not authenticated")]
    NotAuthenticated,

    /// The caller does not own the project
    #[error("only the project owner can do this")]
    NotOwner,

    /// The caller is neither the owner nor an admin
    #[error("not authorized")]
    NotAuthorized,

    /// Input rejected before reaching the store
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Recording the amount would collect more than needed
    #[error("cannot receive {requested}: {received} of {needed} already received")]
    ExceedsNeeded {
        needed: u32,
        received: u32,
        requested: u64,
    },

    /// The addressed record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The store failed or returned something unusable
    #[error("store unavailable: {0}")]
    StoreUnavailable(StoreError),

    /// Identity provider errors
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => Error::NotFound(path),
            other => Error::StoreUnavailable(other),
        }
    }
}

impl Error {
    /// Create a new invalid input error
    pub fn invalid_input<T: fmt::Display>(msg: T) -> Self {
        Error::InvalidInput(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Rejected input, before anything was written
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::ExceedsNeeded { .. })
    }

    /// The caller lacks the right to perform the operation
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Error::NotAuthenticated | Error::NotOwner | Error::NotAuthorized
        )
    }

    /// Generic message suitable for showing to the end user
    pub fn user_message(&self) -> String {
        match self {
            Error::NotAuthenticated => "Please sign in to continue.".to_string(),
            Error::NotOwner | Error::NotAuthorized => {
                "You do not have permission to do this.".to_string()
            }
            Error::InvalidInput(msg) => msg.clone(),
            Error::ExceedsNeeded {
                needed, received, ..
            } => format!(
                "Only {} more can be received for this item.",
                needed.saturating_sub(*received)
            ),
            Error::NotFound(_) => "This record no longer exists.".to_string(),
            Error::Auth(AuthError::InvalidCredentials) => {
                "Incorrect email or password.".to_string()
            }
            Error::Auth(AuthError::InvalidInput(msg)) => msg.clone(),
            Error::Auth(_) | Error::StoreUnavailable(_) | Error::Config(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

/// Result type alias for Sala Solidária operations
pub type Result<T> = std::result::Result<T, Error>;
