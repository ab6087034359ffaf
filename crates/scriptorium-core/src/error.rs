//! Error types shared by every access module.
//!
//! Backends report [`BackendError`]; access modules wrap it in [`Error`]
//! alongside the not-found, validation, and decode cases so callers can
//! tell "nothing there" apart from "the store failed".

use thiserror::Error;

/// Failure reported by a [`Backend`](crate::store::Backend) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request never produced a usable response (connection, timeout, I/O).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The store answered but refused the operation.
    #[error("rejected by backend ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A row or query did not fit the table layout (unknown column, non-object row).
    #[error("schema mismatch: {0}")]
    Schema(String),
}

/// Error returned by the entity access modules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// A stored row could not be read into its typed record.
    #[error("malformed {table} record: {message}")]
    Decode {
        table: &'static str,
        message: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Draft(#[from] crate::draft::DraftError),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
