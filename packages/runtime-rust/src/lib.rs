//! Strata runtime: onion middleware pipeline and cache-aside data layer.

pub mod config;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
pub mod traits;

pub use config::{CacheConfig, LogFormat, LoggingConfig, ResourceConfig, RuntimeConfig};
pub use pipeline::{Chain, ChainConfig, Middleware, Next, PipelineError, Request};
pub use storage::{Cache, QueryFactory, ResourceManager};
pub use traits::DataSource;
