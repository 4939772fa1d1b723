//! Structured error reporting stage.
//!
//! Logs every failure coming back from downstream exactly once, at a level
//! chosen by its [`ErrorKind`](strata_core::ErrorKind), and marks it
//! [`PipelineError::Reported`]. Stages further out see a reported error and
//! neither enrich nor log it again.

use async_trait::async_trait;
use strata_core::ErrorKind;
use tracing::{error, warn};

use crate::pipeline::chain::{Middleware, Next};
use crate::pipeline::error::PipelineError;

/// Logs and marks downstream failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReportMiddleware;

impl ErrorReportMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Logs `err` and wraps it as reported. Already-reported errors are returned
/// untouched.
#[must_use]
pub fn report(err: PipelineError) -> PipelineError {
    if matches!(err, PipelineError::Reported(_)) {
        return err;
    }

    let kind = err.kind();
    let stage = err.stage_info().map(|s| s.middleware_name.clone());
    match kind {
        ErrorKind::Internal => error!(kind = %kind, stage = ?stage, error = %err, "request failed"),
        _ => warn!(kind = %kind, stage = ?stage, error = %err, "request rejected"),
    }
    PipelineError::Reported(anyhow::Error::new(err))
}

#[async_trait]
impl<I, O> Middleware<I, O> for ErrorReportMiddleware
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn handle(&self, input: I, next: Next<I, O>) -> Result<O, PipelineError> {
        next.run(input).await.map_err(report)
    }
}

#[cfg(test)]
mod tests {
    use strata_core::DataError;

    use super::*;
    use crate::pipeline::chain::Chain;

    #[tokio::test]
    async fn stage_failure_is_reported_and_not_re_enriched() {
        let chain: Chain<u32, u32> = Chain::new()
            .with("outer", |n, next: Next<u32, u32>| next.run(n))
            .with_middleware("report", ErrorReportMiddleware::new())
            .with("auth", |_n, _next: Next<u32, u32>| async move {
                Err(PipelineError::stage(DataError::validation("missing token")))
            });

        let err = chain.execute(1, |n| async move { Ok(n) }).await.unwrap_err();

        assert!(matches!(err, PipelineError::Reported(_)));
        assert!(!err.is_enriched());
        assert_eq!(err.kind(), ErrorKind::Validation);

        let reported = err.inner().downcast_ref::<PipelineError>().unwrap();
        assert_eq!(reported.stage_info().unwrap().middleware_name, "auth");
    }

    #[tokio::test]
    async fn handler_failure_is_reported() {
        let chain: Chain<u32, u32> =
            Chain::new().with_middleware("report", ErrorReportMiddleware::new());
        let err = chain
            .execute(1, |_n| async move {
                Err::<u32, _>(DataError::not_found("no such todo").into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Reported(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn reporting_twice_wraps_once() {
        let once = report(PipelineError::stage(anyhow::anyhow!("boom")));
        let twice = report(once);
        let inner = twice.inner().downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(inner, PipelineError::Stage(_)));
    }
}
