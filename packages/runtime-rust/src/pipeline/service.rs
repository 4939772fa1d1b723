//! `tower::Service` adapter: a chain with its terminal handler bound in.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower::Service;

use super::chain::{Chain, HandlerFn};
use super::error::PipelineError;

/// A [`Chain`] paired with its terminal handler, usable wherever a
/// `tower::Service<I>` is expected.
///
/// Cloning is cheap: the chain and handler are shared behind `Arc`s.
pub struct ChainService<I, O> {
    chain: Arc<Chain<I, O>>,
    handler: HandlerFn<I, O>,
}

impl<I, O> ChainService<I, O> {
    pub(crate) fn new(chain: Chain<I, O>, handler: HandlerFn<I, O>) -> Self {
        Self {
            chain: Arc::new(chain),
            handler,
        }
    }

    /// The wrapped chain.
    #[must_use]
    pub fn chain(&self) -> &Chain<I, O> {
        &self.chain
    }
}

impl<I, O> Clone for ChainService<I, O> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<I, O> Service<I> for ChainService<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Response = O;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<O, PipelineError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, input: I) -> Self::Future {
        self.chain.dispatch(input, Arc::clone(&self.handler))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
