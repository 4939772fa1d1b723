//! Cache-aside data layer.
//!
//! - [`ResourceManager`]: per-client single-flight initialization and
//!   factory registry
//! - [`QueryFactory`]: per-resource CRUD over a
//!   [`DataSource`](crate::traits::DataSource), with cached reads and
//!   write-through invalidation
//! - [`Cache`]: shared LRU + TTL cache bounded by entry count and size
//! - [`PaginationAggregator`]: cursor-following page walker

pub mod cache;
pub mod datasources;
pub mod error;
pub mod pagination;
pub mod query;
pub mod request;
pub mod resources;

pub use cache::{Cache, CacheStats};
pub use datasources::MemoryDataSource;
pub use error::{PaginationError, QueryError, QueryOperation, ResourceError, SetupError};
pub use pagination::{Cursor, Page, PageResponse, PaginationAggregator, PaginationOptions};
pub use query::QueryFactory;
pub use request::{IndexQuery, IndexRequest, ListParams, ListRequest};
pub use resources::{ClientStatus, ResourceManager, DEFAULT_CLIENT_KEY};
