//! In-memory [`DataSource`] implementation backed by [`DashMap`].
//!
//! Records live in one ordered map per resource, keyed by the serialized
//! identity of the record, so listings come back in a stable order. Cursor
//! tokens are plain offsets into that order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use strata_core::{DataError, ResourceSchema, Value};

use crate::storage::pagination::Page;
use crate::storage::request::{IndexRequest, ListRequest};
use crate::traits::DataSource;

/// Page size used when a request does not set `limit`.
pub const DEFAULT_PAGE_SIZE: usize = 100;

type Table = BTreeMap<String, Value>;

/// In-memory storage for every resource, safe to share across tasks.
///
/// Filters are field-equality maps: a record matches when each listed
/// field is present and equal. Index queries treat the index name as a
/// label only and match the key fields directly.
pub struct MemoryDataSource {
    tables: DashMap<String, Table>,
    calls: AtomicUsize,
}

impl MemoryDataSource {
    /// Creates a new, empty `MemoryDataSource`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `DataSource` calls served so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of records stored for `resource`.
    #[must_use]
    pub fn len(&self, resource: &str) -> usize {
        self.tables.get(resource).map_or(0, |t| t.len())
    }

    #[must_use]
    pub fn is_empty(&self, resource: &str) -> bool {
        self.len(resource) == 0
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Matching records of `resource`, in storage order.
    fn scan(&self, resource: &str, matches: impl Fn(&Value) -> bool) -> Vec<Value> {
        self.tables.get(resource).map_or_else(Vec::new, |table| {
            table.values().filter(|v| matches(v)).cloned().collect()
        })
    }
}

impl Default for MemoryDataSource {
    fn default() -> Self {
        Self::new()
    }
}

fn storage_key(identity: &BTreeMap<String, Value>) -> anyhow::Result<String> {
    Ok(serde_json::to_string(identity)?)
}

/// Decodes a cursor token into an offset. Absent tokens start at 0.
fn decode_cursor_offset(token: Option<&str>) -> Result<usize, DataError> {
    match token {
        None | Some("") => Ok(0),
        Some(t) => t
            .parse()
            .map_err(|_| DataError::validation(format!("invalid next token '{t}'"))),
    }
}

fn encode_cursor_offset(offset: usize) -> String {
    offset.to_string()
}

/// Whether every field of `conditions` is present in `record` with an equal value.
fn matches_fields(record: &Value, conditions: &BTreeMap<String, Value>) -> bool {
    conditions
        .iter()
        .all(|(field, expected)| record.get(field) == Some(expected))
}

fn filter_fields(filter: Option<&Value>) -> Result<BTreeMap<String, Value>, DataError> {
    match filter {
        None => Ok(BTreeMap::new()),
        Some(Value::Map(fields)) => Ok(fields.clone()),
        Some(_) => Err(DataError::validation("filter must be an object")),
    }
}

/// Cuts one page out of `items` starting at the cursor offset.
fn paginate(
    items: Vec<Value>,
    limit: Option<u32>,
    next_token: Option<&str>,
) -> Result<Page<Value>, DataError> {
    let offset = decode_cursor_offset(next_token)?;
    let size = limit.map_or(DEFAULT_PAGE_SIZE, |l| l as usize).max(1);
    let total = items.len();

    let page: Vec<Value> = items.into_iter().skip(offset).take(size).collect();
    let new_offset = offset + page.len();
    Ok(if new_offset >= total {
        Page::last(page)
    } else {
        Page::with_next(page, encode_cursor_offset(new_offset))
    })
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn create(&self, schema: &ResourceSchema, input: Value) -> anyhow::Result<Value> {
        self.record_call();
        let key = storage_key(&schema.identity(&input)?)?;
        let mut table = self.tables.entry(schema.name.clone()).or_default();
        if table.contains_key(&key) {
            return Err(DataError::conflict(format!("{} already exists", schema.name)).into());
        }
        table.insert(key, input.clone());
        Ok(input)
    }

    async fn update(&self, schema: &ResourceSchema, input: Value) -> anyhow::Result<Value> {
        self.record_call();
        let key = storage_key(&schema.identity(&input)?)?;
        let Value::Map(changes) = input else {
            return Err(DataError::validation("update input must be an object").into());
        };

        let mut table = self.tables.entry(schema.name.clone()).or_default();
        let Some(Value::Map(existing)) = table.get_mut(&key) else {
            return Err(DataError::not_found(format!("{} not found", schema.name)).into());
        };
        existing.extend(changes);
        Ok(Value::Map(existing.clone()))
    }

    async fn delete(&self, schema: &ResourceSchema, input: Value) -> anyhow::Result<Value> {
        self.record_call();
        let key = storage_key(&schema.identity(&input)?)?;
        self.tables
            .get_mut(&schema.name)
            .and_then(|mut table| table.remove(&key))
            .ok_or_else(|| DataError::not_found(format!("{} not found", schema.name)).into())
    }

    async fn get(
        &self,
        schema: &ResourceSchema,
        key: &BTreeMap<String, Value>,
    ) -> anyhow::Result<Option<Value>> {
        self.record_call();
        let key = storage_key(key)?;
        Ok(self
            .tables
            .get(&schema.name)
            .and_then(|table| table.get(&key).cloned()))
    }

    async fn list(
        &self,
        schema: &ResourceSchema,
        request: &ListRequest,
    ) -> anyhow::Result<Page<Value>> {
        self.record_call();
        let filter = filter_fields(request.filter.as_ref())?;
        let items = self.scan(&schema.name, |record| matches_fields(record, &filter));
        Ok(paginate(items, request.limit, request.next_token.as_deref())?)
    }

    async fn query_index(
        &self,
        schema: &ResourceSchema,
        request: &IndexRequest,
    ) -> anyhow::Result<Page<Value>> {
        self.record_call();
        if request.key.is_empty() {
            return Err(DataError::validation(format!(
                "index query on '{}' needs at least one key condition",
                request.index
            ))
            .into());
        }
        let filter = filter_fields(request.filter.as_ref())?;
        let mut items = self.scan(&schema.name, |record| {
            matches_fields(record, &request.key) && matches_fields(record, &filter)
        });
        if !request.scan_forward {
            items.reverse();
        }
        Ok(paginate(items, request.limit, request.next_token.as_deref())?)
    }
}
