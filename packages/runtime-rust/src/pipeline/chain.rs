//! Onion-model middleware chain.
//!
//! A [`Chain`] holds an ordered list of named middleware. Executing it
//! creates one [`Next`] continuation per stage; all of them share a single
//! cursor over the entry list. Calling [`Next::run`] advances the cursor
//! and invokes the entry it pointed at, or the terminal handler once every
//! entry has been entered. Code a middleware runs before `next.run(..)` is
//! the inbound half of its stage, code after it the outbound half.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::debug;

use super::error::{PipelineError, StageInfo};
use super::service::ChainService;

// ---------------------------------------------------------------------------
// Middleware and handler seams
// ---------------------------------------------------------------------------

/// A named stage of a [`Chain`].
///
/// Implementations decide whether and when to call `next`. Not calling it
/// short-circuits the chain: later stages and the handler never run and
/// the value returned here becomes the chain's result.
#[async_trait]
pub trait Middleware<I, O>: Send + Sync + 'static {
    async fn handle(&self, input: I, next: Next<I, O>) -> Result<O, PipelineError>;
}

/// Terminal handler invoked once every stage has called `next`.
pub type HandlerFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, anyhow::Result<O>> + Send + Sync>;

/// Side-effect hook fired once for every error the chain attributes to a stage.
pub type ErrorCallback = Arc<dyn Fn(&PipelineError, &str) + Send + Sync>;

/// Adapts a closure into a [`Middleware`].
struct FnMiddleware<F> {
    f: F,
}

#[async_trait]
impl<I, O, F, Fut> Middleware<I, O> for FnMiddleware<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, Next<I, O>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
{
    async fn handle(&self, input: I, next: Next<I, O>) -> Result<O, PipelineError> {
        (self.f)(input, next).await
    }
}

pub(crate) fn handler_fn<I, O, F, Fut>(handler: F) -> HandlerFn<I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    Arc::new(move |input| handler(input).boxed())
}

// ---------------------------------------------------------------------------
// ChainConfig
// ---------------------------------------------------------------------------

/// Behaviour switches for a [`Chain`].
#[derive(Clone, Default)]
pub struct ChainConfig {
    /// Emit a debug event on entry to and exit from every stage.
    pub debug: bool,
    /// Called once per error attributed to a stage, with the stage name.
    pub on_error: Option<ErrorCallback>,
}

impl ChainConfig {
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PipelineError, &str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("debug", &self.debug)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// A registered stage: its name and implementation.
pub struct MiddlewareEntry<I, O> {
    pub name: Arc<str>,
    pub middleware: Arc<dyn Middleware<I, O>>,
}

impl<I, O> Clone for MiddlewareEntry<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            middleware: Arc::clone(&self.middleware),
        }
    }
}

/// Ordered onion-model pipeline of named middleware.
///
/// Registration is append-only and duplicate names are allowed. Execution
/// order is registration order inbound and the reverse outbound.
///
/// [`execute`](Chain::execute) snapshots the registered entries, so
/// concurrent executions share the entries but each gets its own cursor.
pub struct Chain<I, O> {
    entries: Vec<MiddlewareEntry<I, O>>,
    config: ChainConfig,
}

impl<I, O> Chain<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates an empty chain with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ChainConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ChainConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Appends a closure stage.
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(I, Next<I, O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
    {
        self.add_middleware(name, FnMiddleware { f })
    }

    /// Appends a [`Middleware`] implementation.
    pub fn add_middleware<M>(&mut self, name: impl Into<String>, middleware: M) -> &mut Self
    where
        M: Middleware<I, O>,
    {
        self.entries.push(MiddlewareEntry {
            name: Arc::from(name.into()),
            middleware: Arc::new(middleware),
        });
        self
    }

    /// Builder form of [`add`](Chain::add).
    #[must_use]
    pub fn with<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I, Next<I, O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
    {
        self.add(name, f);
        self
    }

    /// Builder form of [`add_middleware`](Chain::add_middleware).
    #[must_use]
    pub fn with_middleware<M>(mut self, name: impl Into<String>, middleware: M) -> Self
    where
        M: Middleware<I, O>,
    {
        self.add_middleware(name, middleware);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every registered stage.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Registered stage names, in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| &*e.name).collect()
    }

    /// Runs `input` through every stage and then `handler`.
    ///
    /// With no stages registered, `handler` is called directly.
    pub fn execute<F, Fut>(
        &self,
        input: I,
        handler: F,
    ) -> BoxFuture<'static, Result<O, PipelineError>>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.dispatch(input, handler_fn(handler))
    }

    pub(crate) fn dispatch(
        &self,
        input: I,
        handler: HandlerFn<I, O>,
    ) -> BoxFuture<'static, Result<O, PipelineError>> {
        let execution = Execution {
            entries: self.entries.clone().into(),
            cursor: AtomicUsize::new(0),
            handler,
            config: self.config.clone(),
        };
        Next {
            execution: Arc::new(execution),
        }
        .run(input)
    }

    /// Turns the chain into a `tower::Service` that runs `handler` last.
    pub fn into_service<F, Fut>(self, handler: F) -> ChainService<I, O>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        ChainService::new(self, handler_fn(handler))
    }
}

impl<I, O> Default for Chain<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for Chain<I, O> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            config: self.config.clone(),
        }
    }
}

impl<I, O> fmt::Debug for Chain<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field(
                "entries",
                &self.entries.iter().map(|e| &*e.name).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Execution state and continuation
// ---------------------------------------------------------------------------

/// State of one `execute` call, shared by all of its continuations.
struct Execution<I, O> {
    entries: Arc<[MiddlewareEntry<I, O>]>,
    cursor: AtomicUsize,
    handler: HandlerFn<I, O>,
    config: ChainConfig,
}

impl<I, O> Execution<I, O> {
    /// Attributes a stage's own failure to it. Anything already attributed,
    /// reported, or raised by the handler is returned unchanged, including
    /// when a stage re-raises it with added context.
    fn attribute(&self, err: PipelineError, index: usize) -> PipelineError {
        if err.wraps_pipeline_error() {
            return err;
        }
        let PipelineError::Stage(source) = err else {
            return err;
        };

        let name = self.entries[index].name.to_string();
        let enriched = PipelineError::Middleware {
            source,
            stage: Box::new(StageInfo {
                middleware_name: name.clone(),
                middleware_index: index,
                total_middlewares: self.entries.len(),
                chain: self.entries.iter().map(|e| e.name.to_string()).collect(),
            }),
        };

        if self.config.debug {
            debug!(middleware = %name, index, error = %enriched, "middleware failed");
        }
        if let Some(callback) = &self.config.on_error {
            callback(&enriched, &name);
        }
        enriched
    }
}

/// Continuation handed to each stage.
///
/// Consumed by [`run`](Next::run), so a stage can hand control downstream
/// at most once.
pub struct Next<I, O> {
    execution: Arc<Execution<I, O>>,
}

impl<I, O> Next<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Invokes the next stage (or the handler) with `input`, which may be
    /// the value this stage received or a replacement for it.
    pub fn run(self, input: I) -> BoxFuture<'static, Result<O, PipelineError>> {
        let execution = self.execution;
        Box::pin(async move {
            let index = execution.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(entry) = execution.entries.get(index).cloned() else {
                return (execution.handler)(input)
                    .await
                    .map_err(PipelineError::Handler);
            };

            let debug_enabled = execution.config.debug;
            if debug_enabled {
                debug!(middleware = %entry.name, index, "entering middleware");
            }

            let next = Next {
                execution: Arc::clone(&execution),
            };
            let result = entry.middleware.handle(input, next).await;

            if debug_enabled {
                debug!(
                    middleware = %entry.name,
                    index,
                    ok = result.is_ok(),
                    "leaving middleware"
                );
            }
            result.map_err(|err| execution.attribute(err, index))
        })
    }

    /// Number of stages that have not been entered yet in this execution.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.execution
            .entries
            .len()
            .saturating_sub(self.execution.cursor.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use anyhow::Context;
    use parking_lot::Mutex;
    use strata_core::{DataError, ErrorKind};

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;
    type Stage = Next<Vec<String>, String>;
    type StageFuture = BoxFuture<'static, Result<String, PipelineError>>;

    /// Stage that records its inbound and outbound halves.
    fn recording(
        log: &Log,
        name: &'static str,
    ) -> impl Fn(Vec<String>, Stage) -> StageFuture + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |input, next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(format!("{name}-pre"));
                let out = next.run(input).await;
                log.lock().push(format!("{name}-post"));
                out
            })
        }
    }

    fn recording_handler(
        log: &Log,
    ) -> impl Fn(Vec<String>) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static
    {
        let log = Arc::clone(log);
        move |input: Vec<String>| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push("H".to_string());
                Ok(input.join(","))
            })
        }
    }

    #[tokio::test]
    async fn onion_order_inbound_then_reverse_outbound() {
        let log: Log = Arc::default();
        let chain = Chain::new()
            .with("auth", recording(&log, "auth"))
            .with("log", recording(&log, "log"));

        let out = chain
            .execute(vec!["a".to_string()], recording_handler(&log))
            .await
            .unwrap();

        assert_eq!(out, "a");
        assert_eq!(
            *log.lock(),
            vec!["auth-pre", "log-pre", "H", "log-post", "auth-post"]
        );
    }

    #[tokio::test]
    async fn empty_chain_calls_handler_directly() {
        let chain: Chain<u32, u32> = Chain::new();
        assert!(chain.is_empty());
        let out = chain
            .execute(20, |n| async move { Ok(n + 1) })
            .await
            .unwrap();
        assert_eq!(out, 21);
    }

    #[tokio::test]
    async fn stage_can_replace_input() {
        let chain: Chain<u32, u32> = Chain::new()
            .with("double", |n, next: Next<u32, u32>| next.run(n * 2))
            .with("inc", |n, next: Next<u32, u32>| next.run(n + 1));
        let out = chain.execute(5, |n| async move { Ok(n) }).await.unwrap();
        assert_eq!(out, 11);
    }

    #[tokio::test]
    async fn short_circuit_skips_rest_of_chain() {
        let handler_calls = Arc::new(AtomicU32::new(0));
        let later_calls = Arc::new(AtomicU32::new(0));
        let later = Arc::clone(&later_calls);

        let chain: Chain<u32, String> = Chain::new()
            .with("gate", |_n, _next: Next<u32, String>| async move {
                Ok("denied".to_string())
            })
            .with("later", move |n, next: Next<u32, String>| {
                later.fetch_add(1, Ordering::SeqCst);
                next.run(n)
            });

        let calls = Arc::clone(&handler_calls);
        let out = chain
            .execute(1, move |_n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok("handled".to_string()) }
            })
            .await
            .unwrap();

        assert_eq!(out, "denied");
        assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stage_error_is_enriched_with_position() {
        let chain: Chain<u32, u32> = Chain::new()
            .with("outer", |n, next: Next<u32, u32>| next.run(n))
            .with("auth", |_n, _next: Next<u32, u32>| async move {
                Err(PipelineError::stage(anyhow::anyhow!("token expired")))
            })
            .with("inner", |n, next: Next<u32, u32>| next.run(n));

        let err = chain
            .execute(1, |n| async move { Ok(n) })
            .await
            .unwrap_err();

        let stage = err.stage_info().expect("enriched");
        assert_eq!(stage.middleware_name, "auth");
        assert_eq!(stage.middleware_index, 1);
        assert_eq!(stage.total_middlewares, 3);
        assert_eq!(stage.chain, vec!["outer", "auth", "inner"]);
        assert_eq!(err.inner().to_string(), "token expired");
    }

    #[tokio::test]
    async fn enrichment_happens_once_across_many_stages() {
        let callbacks = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&callbacks);
        let config = ChainConfig::default().debug(true).on_error(move |_err, name| {
            assert_eq!(name, "deep");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut chain: Chain<u32, u32> = Chain::with_config(config);
        for name in ["a", "b", "c", "d"] {
            chain.add(name, |n, next: Next<u32, u32>| next.run(n));
        }
        chain.add("deep", |_n, _next: Next<u32, u32>| async move {
            Err(anyhow::anyhow!("deep failure").into())
        });

        let err = chain
            .execute(0, |n| async move { Ok(n) })
            .await
            .unwrap_err();

        assert_eq!(err.stage_info().unwrap().middleware_name, "deep");
        assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_propagates_unchanged() {
        let callbacks = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&callbacks);
        let chain: Chain<u32, u32> = Chain::with_config(ChainConfig::default().on_error(
            move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        ))
        .with("pass", |n, next: Next<u32, u32>| next.run(n));

        let err = chain
            .execute(1, |_n| async move {
                Err::<u32, _>(DataError::not_found("no todo 1").into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Handler(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(callbacks.load(Ordering::SeqCst), 0);
    }

    fn recording_errors(stages: &Log) -> ChainConfig {
        let stages = Arc::clone(stages);
        ChainConfig::default().on_error(move |_err, name| stages.lock().push(name.to_string()))
    }

    #[tokio::test]
    async fn context_added_to_downstream_error_does_not_re_enrich() {
        let stages: Log = Arc::default();
        let chain: Chain<u32, u32> = Chain::with_config(recording_errors(&stages))
            .with("outer", |n, next: Next<u32, u32>| async move {
                Ok::<_, PipelineError>(next.run(n).await.context("outer stage")?)
            })
            .with("deep", |_n, _next: Next<u32, u32>| async move {
                Err(PipelineError::stage(anyhow::anyhow!("deep failure")))
            });

        let err = chain
            .execute(1, |n| async move { Ok(n) })
            .await
            .unwrap_err();

        assert_eq!(*stages.lock(), vec!["deep"]);
        assert_eq!(err.stage_info().unwrap().middleware_name, "deep");
        assert_eq!(err.stage_info().unwrap().middleware_index, 1);
    }

    #[tokio::test]
    async fn context_added_to_handler_error_is_not_attributed_to_the_stage() {
        let stages: Log = Arc::default();
        let chain: Chain<u32, u32> = Chain::with_config(recording_errors(&stages)).with(
            "outer",
            |n, next: Next<u32, u32>| async move {
                Ok::<_, PipelineError>(next.run(n).await.context("outer stage")?)
            },
        );

        let err = chain
            .execute(1, |_n| async move {
                Err::<u32, _>(DataError::not_found("no todo 1").into())
            })
            .await
            .unwrap_err();

        assert!(stages.lock().is_empty());
        assert!(err.stage_info().is_none());
        assert!(!err.is_enriched());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn reported_stage_error_is_not_enriched() {
        let chain: Chain<u32, u32> =
            Chain::new().with("auth", |_n, _next: Next<u32, u32>| async move {
                Err(PipelineError::reported(anyhow::anyhow!("401 already sent")))
            });

        let err = chain
            .execute(1, |n| async move { Ok(n) })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Reported(_)));
    }

    #[tokio::test]
    async fn outer_stage_can_recover_from_downstream_error() {
        let chain: Chain<u32, u32> = Chain::new()
            .with("fallback", |n, next: Next<u32, u32>| async move {
                match next.run(n).await {
                    Ok(v) => Ok(v),
                    Err(_) => Ok(0),
                }
            })
            .with("fail", |_n, _next: Next<u32, u32>| async move {
                Err(PipelineError::stage(anyhow::anyhow!("nope")))
            });

        let out = chain.execute(9, |n| async move { Ok(n) }).await.unwrap();
        assert_eq!(out, 0);
    }

    #[tokio::test]
    async fn concurrent_executions_have_independent_cursors() {
        let chain: Arc<Chain<u32, u32>> = Arc::new(
            Chain::new()
                .with("yield", |n, next: Next<u32, u32>| async move {
                    tokio::task::yield_now().await;
                    next.run(n).await
                })
                .with("inc", |n, next: Next<u32, u32>| next.run(n + 1)),
        );

        let runs: Vec<_> = (0..16)
            .map(|i| chain.execute(i, |n| async move { Ok(n * 10) }))
            .collect();
        let results = futures_util::future::join_all(runs).await;

        for (i, result) in (0..16).zip(results) {
            assert_eq!(result.unwrap(), (i + 1) * 10);
        }
    }

    #[tokio::test]
    async fn remaining_counts_unentered_stages() {
        let chain: Chain<u32, usize> = Chain::new()
            .with("first", |_n, next: Next<u32, usize>| async move { Ok(next.remaining()) })
            .with("second", |n, next: Next<u32, usize>| async move {
                next.run(n).await
            });
        let out = chain.execute(0, |_| async move { Ok(99) }).await.unwrap();
        assert_eq!(out, 1);
    }

    #[test]
    fn registration_bookkeeping() {
        let mut chain: Chain<u32, u32> = Chain::new();
        chain
            .add("a", |n, next: Next<u32, u32>| next.run(n))
            .add("a", |n, next: Next<u32, u32>| next.run(n))
            .add("b", |n, next: Next<u32, u32>| next.run(n));
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.names(), vec!["a", "a", "b"]);
        assert!(format!("{chain:?}").contains("\"b\""));

        chain.clear();
        assert!(chain.is_empty());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn handler_runs_iff_every_stage_calls_next(
                calls_next in proptest::collection::vec(any::<bool>(), 0..8)
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let log: Log = Arc::default();
                let mut chain: Chain<u32, u32> = Chain::new();
                for (i, forward) in calls_next.iter().copied().enumerate() {
                    let log = Arc::clone(&log);
                    chain.add(format!("s{i}"), move |n, next: Next<u32, u32>| {
                        let log = Arc::clone(&log);
                        async move {
                            log.lock().push(format!("s{i}-pre"));
                            let out = if forward { next.run(n).await } else { Ok(n) };
                            log.lock().push(format!("s{i}-post"));
                            out
                        }
                    });
                }

                let handler_log = Arc::clone(&log);
                rt.block_on(chain.execute(0, move |n| {
                    handler_log.lock().push("H".to_string());
                    async move { Ok(n) }
                })).unwrap();

                let entered = calls_next
                    .iter()
                    .position(|f| !f)
                    .map_or(calls_next.len(), |p| p + 1);
                let mut expected: Vec<String> =
                    (0..entered).map(|i| format!("s{i}-pre")).collect();
                if calls_next.iter().all(|f| *f) {
                    expected.push("H".to_string());
                }
                expected.extend((0..entered).rev().map(|i| format!("s{i}-post")));
                prop_assert_eq!(log.lock().clone(), expected);
            }
        }
    }
}
