//! Per-client registry of data sources and query factories.
//!
//! Every client key moves through
//! `Uninitialized -> Initializing -> Ready`. The in-flight attempt is a
//! [`Shared`] future stored in the registry before anyone awaits it, so
//! concurrent callers join the same attempt instead of starting their own.
//! A failed attempt puts the key back to `Uninitialized` so a later call can
//! retry; a successful one is kept until [`ResourceManager::reset`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use strata_core::ResourceSchema;
use tracing::{info, warn};

use super::cache::Cache;
use super::error::{ResourceError, SetupError};
use super::query::QueryFactory;
use crate::config::{ResourceConfig, RuntimeConfig};
use crate::traits::DataSource;

/// Client key used when callers do not name one.
pub const DEFAULT_CLIENT_KEY: &str = "default";

type SetupResult = Result<Arc<dyn DataSource>, Arc<SetupError>>;
type SharedSetup = Shared<BoxFuture<'static, SetupResult>>;

#[derive(Clone)]
enum ClientState {
    Uninitialized,
    Initializing { attempt: u64, setup: SharedSetup },
    Ready(Arc<dyn DataSource>),
}

/// Observable state of a client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Uninitialized,
    Initializing,
    Ready,
}

struct RegistryEntry {
    client: ClientState,
    factories: HashMap<String, Arc<QueryFactory>>,
}

impl Default for RegistryEntry {
    fn default() -> Self {
        Self {
            client: ClientState::Uninitialized,
            factories: HashMap::new(),
        }
    }
}

/// Registry of initialized clients and their per-resource factories.
///
/// Owned by the caller and injected where needed; all factories it creates
/// share its [`Cache`].
pub struct ResourceManager {
    entries: DashMap<String, RegistryEntry>,
    cache: Arc<Cache>,
    config: ResourceConfig,
    attempts: AtomicU64,
}

impl ResourceManager {
    #[must_use]
    pub fn new(cache: Arc<Cache>, config: ResourceConfig) -> Self {
        Self {
            entries: DashMap::new(),
            cache,
            config,
            attempts: AtomicU64::new(0),
        }
    }

    /// Builds a manager and its cache from a runtime configuration.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            Arc::new(Cache::new(config.cache.clone())),
            config.resources.clone(),
        )
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Initializes the client for `key` with `setup`, at most once.
    ///
    /// If the key is ready, its client is returned and `setup` is not
    /// called. If an attempt is in flight, this call waits for it and
    /// `setup` is not called. Otherwise `setup` starts a new attempt,
    /// bounded by the configured init timeout; a timed-out attempt is
    /// dropped.
    ///
    /// `setup` is invoked while the registry shard for `key` is locked, so
    /// it must not call back into this manager before returning its future.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::Initialization`] when the attempt fails or
    /// times out. Every caller that joined the attempt gets the same cause.
    pub async fn initialize<F, Fut>(
        &self,
        key: &str,
        setup: F,
    ) -> Result<Arc<dyn DataSource>, ResourceError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<Arc<dyn DataSource>>> + Send + 'static,
    {
        let (attempt, shared) = {
            let mut entry = self.entries.entry(key.to_string()).or_default();
            match entry.client.clone() {
                ClientState::Ready(client) => return Ok(client),
                ClientState::Initializing { attempt, setup } => (attempt, setup),
                ClientState::Uninitialized => {
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let shared = self.start(setup());
                    entry.client = ClientState::Initializing {
                        attempt,
                        setup: shared.clone(),
                    };
                    (attempt, shared)
                }
            }
        };
        self.settle(key, attempt, shared).await
    }

    fn start<Fut>(&self, setup: Fut) -> SharedSetup
    where
        Fut: Future<Output = anyhow::Result<Arc<dyn DataSource>>> + Send + 'static,
    {
        let limit = self.config.init_timeout();
        let timeout_ms = self.config.init_timeout_ms;
        async move {
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, setup).await {
                    Ok(result) => result,
                    Err(_) => return Err(Arc::new(SetupError::TimedOut { timeout_ms })),
                },
                None => setup.await,
            };
            result.map_err(|e| Arc::new(SetupError::Failed(e)))
        }
        .boxed()
        .shared()
    }

    /// Awaits an attempt and, if it is still the current one for `key`,
    /// records its outcome.
    async fn settle(
        &self,
        key: &str,
        attempt: u64,
        setup: SharedSetup,
    ) -> Result<Arc<dyn DataSource>, ResourceError> {
        let outcome = setup.await;

        if let Some(mut entry) = self.entries.get_mut(key) {
            let current = matches!(
                entry.client,
                ClientState::Initializing { attempt: a, .. } if a == attempt
            );
            if current {
                match &outcome {
                    Ok(client) => {
                        entry.client = ClientState::Ready(Arc::clone(client));
                        info!(client = key, attempt, "client initialized");
                    }
                    Err(err) => {
                        entry.client = ClientState::Uninitialized;
                        warn!(client = key, attempt, error = %err, "client initialization failed");
                    }
                }
            }
        }

        outcome.map_err(|source| ResourceError::Initialization {
            key: key.to_string(),
            source,
        })
    }

    /// Returns the client for `key`, waiting for an in-flight attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotInitialized`] when no attempt has
    /// succeeded or is in flight, or [`ResourceError::Initialization`] when
    /// the in-flight attempt fails.
    pub async fn get_client(&self, key: &str) -> Result<Arc<dyn DataSource>, ResourceError> {
        let state = self.entries.get(key).map(|entry| entry.client.clone());
        match state {
            Some(ClientState::Ready(client)) => Ok(client),
            Some(ClientState::Initializing { attempt, setup }) => {
                self.settle(key, attempt, setup).await
            }
            Some(ClientState::Uninitialized) | None => Err(ResourceError::NotInitialized {
                key: key.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn status(&self, key: &str) -> ClientStatus {
        match self.entries.get(key).map(|entry| entry.client.clone()) {
            Some(ClientState::Ready(_)) => ClientStatus::Ready,
            Some(ClientState::Initializing { .. }) => ClientStatus::Initializing,
            Some(ClientState::Uninitialized) | None => ClientStatus::Uninitialized,
        }
    }

    #[must_use]
    pub fn is_ready(&self, key: &str) -> bool {
        self.status(key) == ClientStatus::Ready
    }

    /// Returns the factory registered under `resource` for `key`, building
    /// it with `build` on first use. Waits for the client to be ready first.
    ///
    /// `build` runs without the registry locked and may call back into this
    /// manager. When two callers race to create the same factory, both may
    /// build one but only the first stored is kept and returned to both.
    ///
    /// # Errors
    ///
    /// Fails like [`get_client`](Self::get_client), and with
    /// [`ResourceError::NotInitialized`] if the key is reset while waiting.
    pub async fn get_or_create_factory_with<F>(
        &self,
        key: &str,
        resource: &str,
        build: F,
    ) -> Result<Arc<QueryFactory>, ResourceError>
    where
        F: FnOnce(Arc<dyn DataSource>, Arc<Cache>) -> QueryFactory + Send,
    {
        let not_initialized = || ResourceError::NotInitialized {
            key: key.to_string(),
        };

        let client = self.get_client(key).await?;
        let existing = self
            .entries
            .get(key)
            .ok_or_else(not_initialized)?
            .factories
            .get(resource)
            .cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let built = Arc::new(build(client, Arc::clone(&self.cache)));

        let mut entry = self.entries.get_mut(key).ok_or_else(not_initialized)?;
        let stored = entry
            .factories
            .entry(resource.to_string())
            .or_insert_with(|| {
                info!(client = key, resource, "query factory created");
                built
            });
        Ok(Arc::clone(stored))
    }

    /// [`get_or_create_factory_with`](Self::get_or_create_factory_with)
    /// using a standard [`QueryFactory`] for `schema`.
    ///
    /// # Errors
    ///
    /// See [`get_or_create_factory_with`](Self::get_or_create_factory_with).
    pub async fn get_or_create_factory(
        &self,
        key: &str,
        schema: &ResourceSchema,
    ) -> Result<Arc<QueryFactory>, ResourceError> {
        let max_pages = self.config.max_pages;
        self.get_or_create_factory_with(key, &schema.name, |client, cache| {
            QueryFactory::new(schema.clone(), client, cache, key).with_max_pages(max_pages)
        })
        .await
    }

    /// Forgets the client and factories of `key`. An attempt in flight
    /// still completes for its waiters but is no longer recorded.
    /// Cached data is left in place.
    pub fn reset(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// [`reset`](Self::reset) for every key.
    pub fn reset_all(&self) {
        self.entries.clear();
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}
