//! Onion-model middleware pipeline.
//!
//! - [`Chain`]: ordered named stages around a terminal handler
//! - [`PipelineError`]: where a failure came from, with stage attribution
//! - [`ChainService`]: a chain as a `tower::Service`
//! - [`middleware`]: built-in stages (timeout, load shedding, metrics,
//!   resource injection, error reporting)

pub mod chain;
pub mod error;
pub mod middleware;
pub mod request;
pub mod service;

pub use chain::{Chain, ChainConfig, ErrorCallback, HandlerFn, Middleware, MiddlewareEntry, Next};
pub use error::{PipelineError, StageFailure, StageInfo};
pub use request::Request;
pub use service::ChainService;
