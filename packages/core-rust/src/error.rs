//! Typed error kinds shared by the data layer and protocol adapters.
//!
//! Data sources raise [`DataError`] with an explicit [`ErrorKind`] at the
//! point of failure. Adapters classify any error by walking its source
//! chain with [`ErrorKind::classify`] instead of matching on message text.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a failed data operation, used by adapters to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The addressed record does not exist.
    NotFound,
    /// The input was rejected (missing identifier, malformed request).
    Validation,
    /// The write conflicts with current state (duplicate key, failed condition).
    Conflict,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }

    /// Classifies an error by the first [`DataError`] in its source chain.
    ///
    /// Errors that carry no typed kind are `Internal`.
    #[must_use]
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(data) = e.downcast_ref::<DataError>() {
                return data.kind;
            }
            current = e.source();
        }
        ErrorKind::Internal
    }

    /// [`classify`](Self::classify) for `anyhow` errors.
    #[must_use]
    pub fn of(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|e| e.downcast_ref::<DataError>().map(|d| d.kind))
            .unwrap_or(ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a data source with an explicit kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DataError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DataError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }
}
