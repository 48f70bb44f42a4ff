//! # Errors
//!
//! Failure taxonomy for the comment board. Validation failures never reach
//! the store; upload and store failures come back from the store port and
//! are folded into `BoardError` at the controller boundary.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The form field a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    AuthorName,
    Content,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::AuthorName => f.write_str("name"),
            Field::Content => f.write_str("message"),
        }
    }
}

/// Local input rejection. Handled without contacting the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: Field },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: Field, max: usize },
}

/// Failure talking to the persistent store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or connectivity failure (e.g., DB down, host unreachable)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request (permission, constraint, unknown parent)
    #[error("store rejected the request: {0}")]
    Rejected(String),

    /// The store answered with something that does not decode into the model
    #[error("malformed store response: {0}")]
    Malformed(String),

    /// No answer within the request bound
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),
}

/// Profile image upload failure. Aborts the submit before any insert.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("image is {size} bytes, the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("file is not a supported image")]
    NotAnImage,

    #[error("image upload failed: {0}")]
    Store(#[from] StoreError),
}

/// The error type surfaced by the board and reply controllers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A reply was submitted while no thread is open
    #[error("no reply thread is open")]
    NoThreadOpen,
}

impl BoardError {
    pub fn is_validation(&self) -> bool {
        matches!(self, BoardError::Validation(_))
    }
}
