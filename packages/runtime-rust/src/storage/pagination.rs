//! Cursor-driven page walking.
//!
//! A data source returns one [`Page`] per call. [`PaginationAggregator`]
//! repeats the call while a cursor remains, up to a page ceiling, and folds
//! the pages into a single [`PageResponse`].

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::PaginationError;

/// One page as returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Resume position; `None` (or empty) when this was the last page.
    #[serde(default)]
    pub next_token: Option<String>,
    /// Operation-level errors reported alongside the page. Non-empty
    /// aborts aggregation.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl<T> Page<T> {
    /// A final page holding `items`.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
            errors: Vec::new(),
        }
    }

    /// A page followed by more under `token`.
    pub fn with_next(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            next_token: Some(token.into()),
            errors: Vec::new(),
        }
    }
}

/// Items gathered over one or more pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    /// Cursor of the first page not fetched, when the walk stopped early
    /// or only one page was requested.
    pub next_token: Option<String>,
    /// Sum of the item counts of every fetched page.
    pub scanned_count: usize,
}

/// Request parameters that carry a pagination cursor.
pub trait Cursor {
    fn set_next_token(&mut self, token: Option<String>);
}

/// How far to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOptions {
    pub follow_all_pages: bool,
    /// Page ceiling when following; values below 1 are treated as 1.
    pub max_pages: u32,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            follow_all_pages: false,
            max_pages: 10,
        }
    }
}

/// Walks a paginated operation according to [`PaginationOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginationAggregator {
    options: PaginationOptions,
}

impl PaginationAggregator {
    #[must_use]
    pub fn new(options: PaginationOptions) -> Self {
        Self { options }
    }

    /// Number of pages this aggregator fetches at most.
    #[must_use]
    pub fn page_limit(&self) -> u32 {
        if self.options.follow_all_pages {
            self.options.max_pages.max(1)
        } else {
            1
        }
    }

    /// Calls `operation` with `initial`, then again with the returned
    /// cursor for as long as one remains and the page limit allows.
    ///
    /// Stopping at the page limit is not an error: the unfetched cursor is
    /// returned in [`PageResponse::next_token`].
    ///
    /// # Errors
    ///
    /// Returns [`PaginationError`] as soon as a call fails or a page reports
    /// errors. Items gathered from earlier pages are discarded.
    pub async fn run<T, P, F, Fut>(
        &self,
        mut operation: F,
        initial: P,
    ) -> Result<PageResponse<T>, PaginationError>
    where
        P: Cursor + Clone,
        F: FnMut(P) -> Fut,
        Fut: Future<Output = anyhow::Result<Page<T>>>,
    {
        let limit = self.page_limit();
        let mut params = initial;
        let mut items = Vec::new();
        let mut scanned_count = 0;
        let mut next_token = None;

        for page in 1..=limit {
            let fetched = operation(params.clone())
                .await
                .map_err(|source| PaginationError::Request { page, source })?;
            if !fetched.errors.is_empty() {
                return Err(PaginationError::PageFailed {
                    page,
                    messages: fetched.errors,
                });
            }

            scanned_count += fetched.items.len();
            items.extend(fetched.items);
            next_token = fetched.next_token.filter(|t| !t.is_empty());

            match &next_token {
                Some(token) => params.set_next_token(Some(token.clone())),
                None => break,
            }
        }

        if next_token.is_some() && self.options.follow_all_pages {
            debug!(max_pages = limit, "page limit reached, returning cursor");
        }

        Ok(PageResponse {
            items,
            next_token,
            scanned_count,
        })
    }
}
