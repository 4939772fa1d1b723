use std::collections::BTreeMap;

use async_trait::async_trait;
use strata_core::{ResourceSchema, Value};

use crate::storage::pagination::Page;
use crate::storage::request::{IndexRequest, ListRequest};

/// Pluggable backend behind a [`QueryFactory`](crate::storage::QueryFactory).
/// Implementations: memory (tests and local runs), remote stores via callers.
///
/// Errors are `anyhow` so backends can attach their own context. Raise
/// [`DataError`](strata_core::DataError) when the failure has a known kind;
/// anything else is classified as internal.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stores a new record and returns it as persisted.
    async fn create(&self, schema: &ResourceSchema, input: Value) -> anyhow::Result<Value>;

    /// Applies `input` to the record addressed by its identifier fields.
    async fn update(&self, schema: &ResourceSchema, input: Value) -> anyhow::Result<Value>;

    /// Removes the record addressed by the identifier fields of `input` and
    /// returns it.
    async fn delete(&self, schema: &ResourceSchema, input: Value) -> anyhow::Result<Value>;

    /// Loads one record by its identity, or `None` when absent.
    async fn get(
        &self,
        schema: &ResourceSchema,
        key: &BTreeMap<String, Value>,
    ) -> anyhow::Result<Option<Value>>;

    /// Fetches one page of records.
    async fn list(
        &self,
        schema: &ResourceSchema,
        request: &ListRequest,
    ) -> anyhow::Result<Page<Value>>;

    /// Fetches one page of records through a secondary index.
    async fn query_index(
        &self,
        schema: &ResourceSchema,
        request: &IndexRequest,
    ) -> anyhow::Result<Page<Value>>;
}
