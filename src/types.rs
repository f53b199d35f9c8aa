//! Core data model (spec §3): `CrawlTask`, `PageData`, `CrawlResult`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// An opaque metadata bag, string keys to JSON-ish primitives. Kept simple
/// (a string enum rather than a `serde_json::Value`) since the core does
/// not otherwise depend on `serde`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

pub type Metadata = HashMap<String, MetaValue>;

/// A unit of crawl work. Created at enqueue, consumed once by a worker,
/// never revived: a retry is a distinct task marked `is_retry`.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: String,
    pub depth: usize,
    pub metadata: Metadata,
    pub parent_url: Option<String>,
    pub is_retry: bool,
}

impl CrawlTask {
    pub fn seed(url: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            metadata,
            parent_url: None,
            is_retry: false,
        }
    }

    pub fn child(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            depth: self.depth + 1,
            metadata: self.metadata.clone(),
            parent_url: Some(self.url.clone()),
            is_retry: false,
        }
    }
}

/// Invariant snapshot of a fetched page (spec §3). `status_code` is always
/// in `[100, 599]`, `url` is well-formed and absolute, and `fetched_at`
/// precedes sink emission by construction (the engine stamps it right
/// after the fetch completes).
#[derive(Debug, Clone)]
pub struct PageData {
    pub url: String,
    pub status_code: u16,
    pub headers: IndexMap<String, String>,
    pub html: String,
    pub title: Option<String>,
    pub metadata: IndexMap<String, String>,
    pub fetched_at: DateTime<Utc>,
    pub scrape_duration_ms: u64,
    pub depth: usize,
}

/// What the sink receives for each processed task.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub page: PageData,
    pub depth: usize,
    pub metadata: Metadata,
    pub discovered_links: Vec<String>,
}
