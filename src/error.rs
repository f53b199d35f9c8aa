//! Error taxonomy for per-task crawl failures.
//!
//! Construction-time failures (bad client config, an unparsable custom
//! filter regex) still surface as `anyhow::Error`, matching the teacher's
//! `Crawler::from_config`. Everything that can happen to a single
//! [`crate::types::CrawlTask`] once it is in flight is a [`CrawlError`].

use thiserror::Error;

/// One variant per entry in the spec's error taxonomy. Kinds, not payload
/// types: the variants carry only what a caller needs to explain *why* a
/// task did not become a result.
#[derive(Debug, Error, Clone)]
pub enum CrawlError {
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("filtered: {reason}")]
    FilteredUrl { reason: String },

    #[error("disallowed by robots.txt")]
    RobotsDenied,

    #[error("transient fetch error: {0}")]
    TransientFetchError(String),

    #[error("permanent fetch error (status {status:?}): {message}")]
    PermanentFetchError {
        status: Option<u16>,
        message: String,
    },

    #[error("middleware error: {0}")]
    MiddlewareError(String),

    #[error("sink error: {0}")]
    SinkError(String),

    #[error("engine cancelled")]
    EngineCancelled,
}

impl CrawlError {
    /// Short, stable name for the variant, used to key the per-kind counts
    /// in [`crate::engine::RunSummary`].
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlError::MalformedUrl(_) => "MalformedUrl",
            CrawlError::FilteredUrl { .. } => "FilteredUrl",
            CrawlError::RobotsDenied => "RobotsDenied",
            CrawlError::TransientFetchError(_) => "TransientFetchError",
            CrawlError::PermanentFetchError { .. } => "PermanentFetchError",
            CrawlError::MiddlewareError(_) => "MiddlewareError",
            CrawlError::SinkError(_) => "SinkError",
            CrawlError::EngineCancelled => "EngineCancelled",
        }
    }
}

/// Terminal disposition of a single task, used for logging and for
/// [`crate::engine::RunSummary`] accounting.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Emitted,
    Dropped(CrawlError),
    Failed(CrawlError),
}

impl TaskOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskOutcome::Emitted => "Emitted",
            TaskOutcome::Dropped(e) | TaskOutcome::Failed(e) => e.kind(),
        }
    }
}
