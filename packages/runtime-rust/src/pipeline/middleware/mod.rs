//! Built-in stages, usable with any input and output type except
//! [`ResourcesMiddleware`], which needs an input that implements
//! [`AttachResources`].

pub mod error_report;
pub mod load_shed;
pub mod metrics;
pub mod resources;
pub mod timeout;

pub use error_report::{report, ErrorReportMiddleware};
pub use load_shed::LoadShedMiddleware;
pub use self::metrics::MetricsMiddleware;
pub use resources::{AttachResources, ResourcesMiddleware, SetupFn};
pub use timeout::TimeoutMiddleware;
