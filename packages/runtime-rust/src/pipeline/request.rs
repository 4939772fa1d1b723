//! Default pipeline input: an event, its request context, and the query
//! factories attached by the resources stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::{RequestContext, Value};

use super::middleware::resources::AttachResources;
use crate::storage::QueryFactory;

/// Input flowing through a request-handling [`Chain`](super::Chain).
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Raw event payload.
    pub event: Value,
    pub context: RequestContext,
    /// Factories keyed by resource name.
    pub resources: BTreeMap<String, Arc<QueryFactory>>,
}

impl Request {
    /// Wraps `event` with a fresh context.
    #[must_use]
    pub fn new(event: Value) -> Self {
        Self {
            event,
            context: RequestContext::new(),
            resources: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// The factory attached for `name`, if any.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&Arc<QueryFactory>> {
        self.resources.get(name)
    }
}

impl AttachResources for Request {
    fn attach_resource(&mut self, name: &str, factory: Arc<QueryFactory>) {
        self.resources.insert(name.to_string(), factory);
    }
}
