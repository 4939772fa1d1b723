//! Load-shedding stage.
//!
//! Rejects executions with [`StageFailure::Overloaded`] when the number of
//! executions currently inside this stage reaches the limit, instead of
//! queueing them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::pipeline::chain::{Middleware, Next};
use crate::pipeline::error::{PipelineError, StageFailure};

/// Concurrency limit for the rest of the chain.
///
/// Clones share the same permits.
#[derive(Debug, Clone)]
pub struct LoadShedMiddleware {
    semaphore: Arc<Semaphore>,
}

impl LoadShedMiddleware {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl<I, O> Middleware<I, O> for LoadShedMiddleware
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn handle(&self, input: I, next: Next<I, O>) -> Result<O, PipelineError> {
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            return Err(PipelineError::stage(StageFailure::Overloaded));
        };
        let result = next.run(input).await;
        drop(permit);
        result
    }
}
