//! Per-resource CRUD facade with cache-aside reads.
//!
//! A [`QueryFactory`] is built once per client key and resource. It turns
//! every call into a [`DataSource`] call, caches `get` results and first
//! pages of unfiltered listings, and invalidates both on writes.
//!
//! Cache keys have the shape `<client>/<Resource>:<op>:<fingerprint>`. The
//! fingerprint covers only the identifier fields for `get`, so inputs that
//! differ in other fields share a slot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use strata_core::hash::fingerprint;
use strata_core::{DataError, ResourceSchema, Value};
use tracing::{debug, warn};

use super::cache::Cache;
use super::error::{QueryError, QueryOperation};
use super::pagination::{PageResponse, PaginationAggregator, PaginationOptions};
use super::request::{IndexQuery, ListParams};
use crate::traits::DataSource;

/// CRUD operations for one resource of one client.
pub struct QueryFactory {
    schema: ResourceSchema,
    source: Arc<dyn DataSource>,
    cache: Arc<Cache>,
    namespace: String,
    max_pages: u32,
}

impl QueryFactory {
    /// Creates a factory. `namespace` is the client key, so two clients
    /// never share cache entries.
    pub fn new(
        schema: ResourceSchema,
        source: Arc<dyn DataSource>,
        cache: Arc<Cache>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            schema,
            source,
            cache,
            namespace: namespace.into(),
            max_pages: PaginationOptions::default().max_pages,
        }
    }

    /// Default page ceiling for calls that follow all pages.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.schema.name
    }

    #[must_use]
    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    fn get_key(&self, identity: &BTreeMap<String, Value>) -> String {
        format!(
            "{}/{}:get:{}",
            self.namespace,
            self.schema.name,
            fingerprint(identity)
        )
    }

    fn list_key<T: Serialize + ?Sized>(&self, discriminant: &T) -> String {
        format!(
            "{}/{}:list:{}",
            self.namespace,
            self.schema.name,
            fingerprint(discriminant)
        )
    }

    fn index_key<T: Serialize + ?Sized>(&self, discriminant: &T) -> String {
        format!(
            "{}/{}:list:index:{}",
            self.namespace,
            self.schema.name,
            fingerprint(discriminant)
        )
    }

    /// Drops every cached listing of this resource, index queries included.
    fn invalidate_lists(&self) {
        let pattern = format!("{}/{}:list", self.namespace, self.schema.name);
        let removed = self.cache.invalidate_pattern(&pattern);
        debug!(resource = %self.schema.name, removed, "invalidated cached listings");
    }

    fn fail(&self, operation: QueryOperation, source: anyhow::Error) -> QueryError {
        let err = QueryError::new(self.schema.name.clone(), operation, source);
        warn!(
            resource = %err.resource,
            operation = %operation,
            kind = %err.kind,
            error = %format!("{:#}", err.source),
            "data operation failed"
        );
        err
    }

    fn identity(
        &self,
        operation: QueryOperation,
        input: &Value,
    ) -> Result<BTreeMap<String, Value>, QueryError> {
        self.schema
            .identity(input)
            .map_err(|e| self.fail(operation, e.into()))
    }

    /// Creates a record.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] wrapping the data source failure.
    pub async fn create(&self, input: Value) -> Result<Value, QueryError> {
        let created = self
            .source
            .create(&self.schema, input)
            .await
            .map_err(|e| self.fail(QueryOperation::Create, e))?;
        self.invalidate_lists();
        Ok(created)
    }

    /// Updates the record addressed by the identifier fields of `input`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when `input` lacks an identifier field
    /// (`Validation`) or the data source fails.
    pub async fn update(&self, input: Value) -> Result<Value, QueryError> {
        let identity = self.identity(QueryOperation::Update, &input)?;
        let updated = self
            .source
            .update(&self.schema, input)
            .await
            .map_err(|e| self.fail(QueryOperation::Update, e))?;
        self.cache.delete(&self.get_key(&identity));
        self.invalidate_lists();
        Ok(updated)
    }

    /// Deletes the record addressed by the identifier fields of `input`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when `input` lacks an identifier field
    /// (`Validation`) or the data source fails.
    pub async fn delete(&self, input: Value) -> Result<Value, QueryError> {
        let identity = self.identity(QueryOperation::Delete, &input)?;
        let deleted = self
            .source
            .delete(&self.schema, input)
            .await
            .map_err(|e| self.fail(QueryOperation::Delete, e))?;
        self.cache.delete(&self.get_key(&identity));
        self.invalidate_lists();
        Ok(deleted)
    }

    /// Loads the record addressed by the identifier fields of `input`.
    /// Other fields of `input` are ignored, including for caching.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] of kind `NotFound` when no record exists,
    /// `Validation` when `input` lacks an identifier field, or wrapping
    /// the data source failure.
    pub async fn get(&self, input: &Value) -> Result<Value, QueryError> {
        let identity = self.identity(QueryOperation::Get, input)?;
        let key = self.get_key(&identity);
        if let Some(hit) = self.cache.get::<Value>(&key) {
            return Ok(hit);
        }

        let found = self
            .source
            .get(&self.schema, &identity)
            .await
            .map_err(|e| self.fail(QueryOperation::Get, e))?;
        let Some(item) = found else {
            let missing = DataError::not_found(format!("{} not found", self.schema.name));
            return Err(self.fail(QueryOperation::Get, missing.into()));
        };

        self.cache.set(&key, item.clone());
        Ok(item)
    }

    fn aggregator(&self, follow_all_pages: bool, max_pages: Option<u32>) -> PaginationAggregator {
        PaginationAggregator::new(PaginationOptions {
            follow_all_pages,
            max_pages: max_pages.unwrap_or(self.max_pages),
        })
    }

    /// Lists records, following pages when asked to.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when any page request fails or reports errors.
    pub async fn list(&self, params: ListParams) -> Result<PageResponse<Value>, QueryError> {
        let key = params.is_cacheable().then(|| self.list_key(&params.limit));
        if let Some(hit) = key
            .as_deref()
            .and_then(|k| self.cache.get::<PageResponse<Value>>(k))
        {
            return Ok(hit);
        }

        let (source, schema) = (&self.source, &self.schema);
        let response = self
            .aggregator(params.follow_all_pages, params.max_pages)
            .run(
                |request| async move { source.list(schema, &request).await },
                params.request(),
            )
            .await
            .map_err(|e| self.fail(QueryOperation::List, e.into()))?;

        if let Some(key) = key {
            self.cache.set(&key, response.clone());
        }
        Ok(response)
    }

    /// Queries a secondary index, following pages when asked to.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when any page request fails or reports errors.
    pub async fn index_query(
        &self,
        query: IndexQuery,
    ) -> Result<PageResponse<Value>, QueryError> {
        let key = query.is_cacheable().then(|| {
            self.index_key(&(&query.index, &query.key, query.limit, query.scan_forward))
        });
        if let Some(hit) = key
            .as_deref()
            .and_then(|k| self.cache.get::<PageResponse<Value>>(k))
        {
            return Ok(hit);
        }

        let (source, schema) = (&self.source, &self.schema);
        let response = self
            .aggregator(query.follow_all_pages, query.max_pages)
            .run(
                |request| async move { source.query_index(schema, &request).await },
                query.request(),
            )
            .await
            .map_err(|e| self.fail(QueryOperation::IndexQuery, e.into()))?;

        if let Some(key) = key {
            self.cache.set(&key, response.clone());
        }
        Ok(response)
    }
}

impl std::fmt::Debug for QueryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFactory")
            .field("resource", &self.schema.name)
            .field("namespace", &self.namespace)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}
