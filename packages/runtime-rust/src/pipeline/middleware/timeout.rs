//! Timeout stage.
//!
//! Fails the stage with [`StageFailure::Timeout`] when everything downstream
//! of it does not finish within the configured duration. The downstream
//! future is dropped on expiry.

use std::time::Duration;

use async_trait::async_trait;

use crate::pipeline::chain::{Middleware, Next};
use crate::pipeline::error::{PipelineError, StageFailure};

/// Bounds the time spent in the rest of the chain.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn from_millis(timeout_ms: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms))
    }
}

#[async_trait]
impl<I, O> Middleware<I, O> for TimeoutMiddleware
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn handle(&self, input: I, next: Next<I, O>) -> Result<O, PipelineError> {
        match tokio::time::timeout(self.timeout, next.run(input)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                Err(PipelineError::stage(StageFailure::Timeout { timeout_ms }))
            }
        }
    }
}
