//! Metrics stage.
//!
//! Wraps the rest of the chain in a `tracing` span, records its duration in
//! the `strata_stage_duration_seconds` histogram labelled by pipeline and
//! outcome, and logs one event per execution.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info_span, Instrument};

use crate::pipeline::chain::{Middleware, Next};
use crate::pipeline::error::PipelineError;

/// Per-execution timing and outcome for a named pipeline.
#[derive(Debug, Clone)]
pub struct MetricsMiddleware {
    pipeline: Arc<str>,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new(pipeline: impl Into<Arc<str>>) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }
}

#[async_trait]
impl<I, O> Middleware<I, O> for MetricsMiddleware
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn handle(&self, input: I, next: Next<I, O>) -> Result<O, PipelineError> {
        let span = info_span!(
            "pipeline",
            pipeline = %self.pipeline,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = next.run(input).await;
            let elapsed = start.elapsed();

            let outcome = match &result {
                Ok(_) => "ok",
                Err(_) => "error",
            };
            metrics::histogram!(
                "strata_stage_duration_seconds",
                "pipeline" => self.pipeline.to_string(),
                "outcome" => outcome
            )
            .record(elapsed.as_secs_f64());

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = elapsed.as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            tracing::info!(
                pipeline = %self.pipeline,
                duration_ms,
                outcome,
                "pipeline complete"
            );

            result
        }
        .instrument(span)
        .await
    }
}
