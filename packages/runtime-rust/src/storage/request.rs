//! Read parameters for `list` and `index_query`.
//!
//! [`ListParams`] and [`IndexQuery`] are what callers hand to a
//! [`QueryFactory`](super::QueryFactory). They carry paging behaviour on top
//! of the per-page [`ListRequest`]/[`IndexRequest`] that a
//! [`DataSource`](crate::traits::DataSource) receives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strata_core::Value;

use super::pagination::Cursor;

/// One page request for a plain listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub limit: Option<u32>,
    /// Field-equality filter; `None` lists everything.
    pub filter: Option<Value>,
    pub next_token: Option<String>,
}

impl Cursor for ListRequest {
    fn set_next_token(&mut self, token: Option<String>) {
        self.next_token = token;
    }
}

/// One page request against a secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub index: String,
    /// Index key conditions; every listed field must match.
    pub key: BTreeMap<String, Value>,
    pub limit: Option<u32>,
    pub filter: Option<Value>,
    pub next_token: Option<String>,
    pub scan_forward: bool,
}

impl Cursor for IndexRequest {
    fn set_next_token(&mut self, token: Option<String>) {
        self.next_token = token;
    }
}

/// Caller-facing parameters of [`QueryFactory::list`](super::QueryFactory::list).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub filter: Option<Value>,
    pub next_token: Option<String>,
    /// Keep fetching until the cursor runs out or `max_pages` is reached.
    pub follow_all_pages: bool,
    /// Page ceiling; falls back to the factory default when `None`.
    pub max_pages: Option<u32>,
}

impl ListParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn next_token(mut self, token: impl Into<String>) -> Self {
        self.next_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn follow_all_pages(mut self, max_pages: Option<u32>) -> Self {
        self.follow_all_pages = true;
        self.max_pages = max_pages;
        self
    }

    /// Only first pages of unfiltered listings are cached.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.filter.is_none() && self.next_token.is_none() && !self.follow_all_pages
    }

    pub(crate) fn request(&self) -> ListRequest {
        ListRequest {
            limit: self.limit,
            filter: self.filter.clone(),
            next_token: self.next_token.clone(),
        }
    }
}

/// Caller-facing parameters of
/// [`QueryFactory::index_query`](super::QueryFactory::index_query).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub index: String,
    pub key: BTreeMap<String, Value>,
    pub limit: Option<u32>,
    pub filter: Option<Value>,
    pub next_token: Option<String>,
    pub scan_forward: bool,
    pub follow_all_pages: bool,
    pub max_pages: Option<u32>,
}

impl IndexQuery {
    /// Queries `index` for records whose fields equal every entry of `key`.
    pub fn new<K, V>(index: impl Into<String>, key: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            index: index.into(),
            key: key.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            limit: None,
            filter: None,
            next_token: None,
            scan_forward: true,
            follow_all_pages: false,
            max_pages: None,
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn next_token(mut self, token: impl Into<String>) -> Self {
        self.next_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.scan_forward = false;
        self
    }

    #[must_use]
    pub fn follow_all_pages(mut self, max_pages: Option<u32>) -> Self {
        self.follow_all_pages = true;
        self.max_pages = max_pages;
        self
    }

    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.filter.is_none() && self.next_token.is_none() && !self.follow_all_pages
    }

    pub(crate) fn request(&self) -> IndexRequest {
        IndexRequest {
            index: self.index.clone(),
            key: self.key.clone(),
            limit: self.limit,
            filter: self.filter.clone(),
            next_token: self.next_token.clone(),
            scan_forward: self.scan_forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_first_page_is_cacheable() {
        assert!(ListParams::new().limit(10).is_cacheable());
        let done = Value::object([("done", Value::from(true))]);
        assert!(!ListParams::new().filter(done).is_cacheable());
        assert!(!ListParams::new().next_token("abc").is_cacheable());
        assert!(!ListParams::new().follow_all_pages(None).is_cacheable());
    }

    #[test]
    fn index_query_builder() {
        let query = IndexQuery::new("byOwner", [("owner", "ann")]).limit(5).reverse();
        assert_eq!(query.key.get("owner"), Some(&Value::from("ann")));
        assert!(query.is_cacheable());

        let request = query.request();
        assert_eq!(request.index, "byOwner");
        assert_eq!(request.limit, Some(5));
        assert!(!request.scan_forward);
    }

    #[test]
    fn cursor_replaces_token() {
        let mut request = ListParams::new().next_token("a").request();
        request.set_next_token(Some("b".to_string()));
        assert_eq!(request.next_token.as_deref(), Some("b"));
    }
}
