//! Strata core: record values, resource schemas, request context, and typed error kinds.

pub mod context;
pub mod error;
pub mod hash;
pub mod schema;
pub mod types;

pub use context::RequestContext;
pub use error::{DataError, ErrorKind};
pub use schema::{FieldDef, ResourceSchema};
pub use types::{Principal, Value};
