//! Error types for the data layer.

use std::fmt;
use std::sync::Arc;

use strata_core::ErrorKind;

/// The CRUD operation a [`QueryError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperation {
    Create,
    Update,
    Delete,
    Get,
    List,
    IndexQuery,
}

impl QueryOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueryOperation::Create => "create",
            QueryOperation::Update => "update",
            QueryOperation::Delete => "delete",
            QueryOperation::Get => "get",
            QueryOperation::List => "list",
            QueryOperation::IndexQuery => "index_query",
        }
    }

    /// Past participle used in error messages ("could not be created").
    #[must_use]
    pub fn past_participle(self) -> &'static str {
        match self {
            QueryOperation::Create => "created",
            QueryOperation::Update => "updated",
            QueryOperation::Delete => "deleted",
            QueryOperation::Get => "retrieved",
            QueryOperation::List => "listed",
            QueryOperation::IndexQuery => "queried",
        }
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed CRUD call, named after the resource it targeted.
///
/// The original failure is kept as the error source; `kind` is its
/// classification, computed when the error is wrapped.
#[derive(Debug, thiserror::Error)]
#[error("{resource} could not be {}", .operation.past_participle())]
pub struct QueryError {
    pub resource: String,
    pub operation: QueryOperation,
    pub kind: ErrorKind,
    #[source]
    pub source: anyhow::Error,
}

impl QueryError {
    /// Wraps `source`, classifying it by the typed errors in its chain.
    pub fn new(
        resource: impl Into<String>,
        operation: QueryOperation,
        source: anyhow::Error,
    ) -> Self {
        Self {
            resource: resource.into(),
            operation,
            kind: ErrorKind::of(&source),
            source,
        }
    }
}

/// Why a client setup attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("client setup timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("client setup failed: {0}")]
    Failed(#[source] anyhow::Error),
}

/// Failures of the resource registry.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// No setup has succeeded or is in flight for this client key.
    #[error("client '{key}' has not been initialized")]
    NotInitialized { key: String },

    /// The setup attempt failed. Every caller that joined the same attempt
    /// receives the same shared `source`.
    #[error("client '{key}' failed to initialize")]
    Initialization {
        key: String,
        #[source]
        source: Arc<SetupError>,
    },
}

/// Failures while walking a paginated result set.
#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    /// The page request itself failed.
    #[error("page {page} could not be fetched")]
    Request {
        page: u32,
        #[source]
        source: anyhow::Error,
    },
    /// The page was returned but reported operation-level errors.
    #[error("page {page} reported errors: {}", .messages.join("; "))]
    PageFailed { page: u32, messages: Vec<String> },
}
