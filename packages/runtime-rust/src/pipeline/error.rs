//! Error taxonomy for the middleware pipeline.
//!
//! Every failure leaving a [`Chain`](super::Chain) is a [`PipelineError`]
//! whose variant records where it came from. The chain only ever turns a
//! [`PipelineError::Stage`] into a [`PipelineError::Middleware`], and only
//! when the stage error does not already wrap a `PipelineError` (as it does
//! after `next.run(..).await.context(..)?`). Everything else passes through
//! untouched, which keeps enrichment to at most once per error.

use strata_core::ErrorKind;

use crate::storage::error::{QueryError, ResourceError};

/// Position of the failing stage within the chain that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    /// Registered name of the failing middleware.
    pub middleware_name: String,
    /// Zero-based position of the failing middleware.
    pub middleware_index: usize,
    /// Number of middleware registered when the chain executed.
    pub total_middlewares: usize,
    /// Names of every registered middleware, in execution order.
    pub chain: Vec<String>,
}

/// Failure produced while executing a chain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raised by a stage itself and not yet attributed to it. The chain
    /// converts this into [`PipelineError::Middleware`] on the way out.
    #[error("{0}")]
    Stage(#[source] anyhow::Error),

    /// A stage failure annotated with its chain position.
    #[error("middleware '{}' failed: {source}", .stage.middleware_name)]
    Middleware {
        #[source]
        source: anyhow::Error,
        stage: Box<StageInfo>,
    },

    /// Raised by the terminal handler. Never re-attributed to a stage.
    #[error("{0}")]
    Handler(#[source] anyhow::Error),

    /// Already logged or shaped by its origin. Never re-attributed.
    #[error("{0}")]
    Reported(#[source] anyhow::Error),
}

impl PipelineError {
    /// Wraps a new failure raised by the calling stage.
    pub fn stage(err: impl Into<anyhow::Error>) -> Self {
        PipelineError::Stage(err.into())
    }

    /// Wraps a failure that its origin has already reported.
    pub fn reported(err: impl Into<anyhow::Error>) -> Self {
        PipelineError::Reported(err.into())
    }

    /// Chain position of the failing stage, if this error was enriched.
    ///
    /// Looks through context a stage added to a downstream error before
    /// returning it.
    #[must_use]
    pub fn stage_info(&self) -> Option<&StageInfo> {
        match self {
            PipelineError::Middleware { stage, .. } => Some(stage),
            PipelineError::Stage(source) => source
                .chain()
                .find_map(|e| e.downcast_ref::<PipelineError>())
                .and_then(PipelineError::stage_info),
            _ => None,
        }
    }

    /// Whether this is a stage failure that already went through a chain,
    /// re-raised with `?` after adding context.
    pub(crate) fn wraps_pipeline_error(&self) -> bool {
        match self {
            PipelineError::Stage(source) => source
                .chain()
                .any(|e| e.downcast_ref::<PipelineError>().is_some()),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_enriched(&self) -> bool {
        matches!(self, PipelineError::Middleware { .. })
    }

    /// Classifies the underlying failure for protocol adapters.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::classify(self)
    }

    /// The wrapped failure, without pipeline attribution.
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        match self {
            PipelineError::Stage(e)
            | PipelineError::Handler(e)
            | PipelineError::Reported(e)
            | PipelineError::Middleware { source: e, .. } => e,
        }
    }

    #[must_use]
    pub fn into_inner(self) -> anyhow::Error {
        match self {
            PipelineError::Stage(e)
            | PipelineError::Handler(e)
            | PipelineError::Reported(e)
            | PipelineError::Middleware { source: e, .. } => e,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Stage(err)
    }
}

impl From<QueryError> for PipelineError {
    fn from(err: QueryError) -> Self {
        PipelineError::Stage(err.into())
    }
}

impl From<ResourceError> for PipelineError {
    fn from(err: ResourceError) -> Self {
        PipelineError::Stage(err.into())
    }
}

/// Failures raised by the built-in stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    #[error("downstream stages timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("pipeline overloaded, try again later")]
    Overloaded,
}

#[cfg(test)]
mod tests {
    use strata_core::DataError;

    use super::*;

    fn stage_info() -> Box<StageInfo> {
        Box::new(StageInfo {
            middleware_name: "auth".to_string(),
            middleware_index: 0,
            total_middlewares: 2,
            chain: vec!["auth".to_string(), "log".to_string()],
        })
    }

    #[test]
    fn middleware_display_names_the_stage() {
        let err = PipelineError::Middleware {
            source: anyhow::anyhow!("token expired"),
            stage: stage_info(),
        };
        assert_eq!(err.to_string(), "middleware 'auth' failed: token expired");
        assert!(err.is_enriched());
        assert_eq!(err.stage_info().unwrap().total_middlewares, 2);
    }

    #[test]
    fn handler_display_is_inner_message() {
        let err = PipelineError::Handler(anyhow::anyhow!("bad input"));
        assert_eq!(err.to_string(), "bad input");
        assert!(err.stage_info().is_none());
    }

    #[test]
    fn kind_reads_through_every_variant() {
        let handler = PipelineError::Handler(DataError::not_found("gone").into());
        assert_eq!(handler.kind(), ErrorKind::NotFound);

        let enriched = PipelineError::Middleware {
            source: DataError::validation("bad").into(),
            stage: stage_info(),
        };
        assert_eq!(enriched.kind(), ErrorKind::Validation);

        let reported = PipelineError::reported(anyhow::Error::new(PipelineError::Handler(
            DataError::conflict("dup").into(),
        )));
        assert_eq!(reported.kind(), ErrorKind::Conflict);

        assert_eq!(PipelineError::stage(StageFailure::Overloaded).kind(), ErrorKind::Internal);
    }

    #[test]
    fn stage_info_looks_through_added_context() {
        let enriched = PipelineError::Middleware {
            source: anyhow::anyhow!("token expired"),
            stage: stage_info(),
        };
        let rewrapped = PipelineError::stage(anyhow::Error::new(enriched).context("outer stage"));

        assert!(rewrapped.wraps_pipeline_error());
        assert!(!rewrapped.is_enriched());
        assert_eq!(rewrapped.stage_info().unwrap().middleware_name, "auth");
        assert!(!PipelineError::stage(anyhow::anyhow!("fresh")).wraps_pipeline_error());
    }

    #[test]
    fn anyhow_converts_to_unattributed_stage_error() {
        let err: PipelineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, PipelineError::Stage(_)));
        assert_eq!(err.into_inner().to_string(), "boom");
    }
}
