//! Cursor pagination over ordered range scans.
//!
//! A cursor is the sort key of the last item of a full page. The next query
//! resumes strictly past that value, so inserts or removals anywhere other
//! than exactly at the cursor never shift the following page.

use serde::{Deserialize, Serialize};

/// Continuation token of a [`Page`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub next: String,
}

/// One page of query results, serialized as `{data, page?: {next}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageToken>,
}

impl<T> Page<T> {
    /// Build a page from scan results fetched with `limit`.
    ///
    /// Only a full page carries a `next` token; a short page is the end.
    pub fn from_scan(data: Vec<T>, limit: usize, sort_key: impl Fn(&T) -> String) -> Self {
        let page = if limit > 0 && data.len() == limit {
            data.last().map(|last| PageToken {
                next: sort_key(last),
            })
        } else {
            None
        };
        Self { data, page }
    }

    /// The `next` cursor, if any.
    pub fn next(&self) -> Option<&str> {
        self.page.as_ref().map(|p| p.next.as_str())
    }
}

/// Caller-side parameters of a paginated query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageQuery {
    pub limit: usize,
    #[serde(default)]
    pub next: Option<String>,
}

impl PageQuery {
    /// Upper bound applied to every requested page size.
    pub const MAX_LIMIT: usize = 200;

    pub fn new(limit: usize) -> Self {
        Self { limit, next: None }
    }

    pub fn after(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Requested limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}
