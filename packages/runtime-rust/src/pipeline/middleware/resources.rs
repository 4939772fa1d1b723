//! Resource injection stage.
//!
//! Makes sure the client for a key is initialized, builds (or reuses) the
//! query factories for a fixed set of resources and attaches them to the
//! input before calling `next`. Client setup runs once per key no matter how
//! many executions pass through concurrently.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use strata_core::ResourceSchema;

use crate::pipeline::chain::{Middleware, Next};
use crate::pipeline::error::PipelineError;
use crate::storage::{QueryFactory, ResourceManager, DEFAULT_CLIENT_KEY};
use crate::traits::DataSource;

/// Inputs that can carry query factories by resource name.
pub trait AttachResources {
    fn attach_resource(&mut self, name: &str, factory: Arc<QueryFactory>);
}

/// Client setup invoked on the first execution for a key (and again after
/// a failed attempt).
pub type SetupFn =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn DataSource>>> + Send + Sync>;

/// Attaches one factory per configured resource to every input.
pub struct ResourcesMiddleware {
    manager: Arc<ResourceManager>,
    client_key: String,
    setup: SetupFn,
    schemas: Vec<ResourceSchema>,
}

impl ResourcesMiddleware {
    /// Uses `setup` to initialize the default client key.
    pub fn new<F, Fut>(manager: Arc<ResourceManager>, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arc<dyn DataSource>>> + Send + 'static,
    {
        Self {
            manager,
            client_key: DEFAULT_CLIENT_KEY.to_string(),
            setup: Arc::new(move || setup().boxed()),
            schemas: Vec::new(),
        }
    }

    #[must_use]
    pub fn client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = key.into();
        self
    }

    /// Adds a resource whose factory is attached under `schema.name`.
    #[must_use]
    pub fn resource(mut self, schema: ResourceSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }
}

#[async_trait]
impl<I, O> Middleware<I, O> for ResourcesMiddleware
where
    I: AttachResources + Send + 'static,
    O: Send + 'static,
{
    async fn handle(&self, mut input: I, next: Next<I, O>) -> Result<O, PipelineError> {
        let setup = Arc::clone(&self.setup);
        self.manager
            .initialize(&self.client_key, move || setup())
            .await?;

        for schema in &self.schemas {
            let factory = self
                .manager
                .get_or_create_factory(&self.client_key, schema)
                .await?;
            input.attach_resource(&schema.name, factory);
        }
        next.run(input).await
    }
}
