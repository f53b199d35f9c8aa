//! Crawler configuration: every knob from spec §6, plus the frozen
//! operational constants that are not caller-settable.
//!
//! Kept in the teacher's shape: a plain `CrawlerConfig` struct with
//! `Default`, assembled through a consuming `CrawlerBuilder`, but widened
//! from the teacher's four fields to the full set spec §6 recognizes.

use std::time::Duration;

use regex::Regex;

pub const USER_AGENT: &str = "JambudipaSpider/1.0";

// Frozen operational constants (spec §6). Not configurable: these bound the
// engine's own health-monitoring and timeout behavior, not the crawl policy.
pub const STALE_WORKER_THRESHOLD_MS: u64 = 60_000;
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);
pub const MEMORY_THRESHOLD_BYTES: u64 = 1 << 30; // 1 GiB
pub const QUEUE_SIZE_THRESHOLD: usize = 10_000;
pub const TASK_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(10);
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(45);
pub const FETCH_RETRY_COUNT: u32 = 2;
pub const FAILURE_DETECTOR_INTERVAL: Duration = Duration::from_secs(30);
pub const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const RETRY_BACKOFF_BASE_MS: u64 = 500;
pub const RETRY_BACKOFF_CAP_MS: u64 = 10_000;

/// How `normalize()` treats a leading `www.` on the host (spec §4.1 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WwwHandling {
    /// Strip a leading `www.`.
    Ignore,
    Preserve,
    PreferWww,
    PreferNonWww,
}

/// How `normalize()` treats the scheme (spec §4.1 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolHandling {
    /// Force `https`.
    Ignore,
    Preserve,
    PreferHttps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingSlashHandling {
    /// Strip a trailing `/` unless the path is just `/`.
    Ignore,
    Preserve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryParamHandling {
    /// Drop the query string entirely.
    Ignore,
    /// Sort params by key, stable within key.
    Sort,
    Preserve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentHandling {
    Ignore,
    Preserve,
}

/// URL-normalization policy bundle (spec §4.1).
#[derive(Debug, Clone)]
pub struct NormalizationPolicy {
    pub www_handling: WwwHandling,
    pub protocol_handling: ProtocolHandling,
    pub trailing_slash_handling: TrailingSlashHandling,
    pub query_param_handling: QueryParamHandling,
    pub fragment_handling: FragmentHandling,
    /// Collapse duplicate path slashes. Off by default per spec §4.1 ("keep
    /// behavior faithful" unless explicitly configured).
    pub collapse_duplicate_slashes: bool,
    /// Schemes accepted by the normalizer itself (distinct from the
    /// filter's scheme rule, spec §4.2 rule 1); rejects `mailto:`,
    /// `javascript:`, `data:`, `tel:`, `ftp:` unless listed here.
    pub allowed_schemes: Vec<String>,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            www_handling: WwwHandling::Ignore,
            protocol_handling: ProtocolHandling::Ignore,
            trailing_slash_handling: TrailingSlashHandling::Ignore,
            query_param_handling: QueryParamHandling::Ignore,
            fragment_handling: FragmentHandling::Ignore,
            collapse_duplicate_slashes: false,
            allowed_schemes: vec!["http".into(), "https".into()],
        }
    }
}

/// File-extension filter families (spec §4.2 rule 6).
#[derive(Debug, Clone, Copy)]
pub struct FileExtensionFilters {
    pub archives: bool,
    pub images: bool,
    pub audio: bool,
    pub video: bool,
    pub office_docs: bool,
    /// "other": css + js.
    pub other: bool,
}

impl Default for FileExtensionFilters {
    fn default() -> Self {
        Self {
            archives: true,
            images: true,
            audio: true,
            video: true,
            office_docs: true,
            other: true,
        }
    }
}

/// Technical filters (spec §6): unsupported schemes, overly long URLs,
/// malformed URLs. These gate whether filter rules 1-3 run at all.
#[derive(Debug, Clone, Copy)]
pub struct TechnicalFilters {
    pub unsupported_schemes: bool,
    pub long_urls: bool,
    pub malformed: bool,
}

impl Default for TechnicalFilters {
    fn default() -> Self {
        Self {
            unsupported_schemes: true,
            long_urls: true,
            malformed: true,
        }
    }
}

/// Immutable, enumerated engine configuration (spec §3, §6).
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub max_pages: Option<usize>,
    pub max_depth: Option<usize>,

    pub max_concurrent_workers: usize,
    pub max_concurrent_requests: usize,
    /// Intra-worker fetch parallelism. Accepted and threaded through to
    /// custom `Fetcher` implementations; the stock `ReqwestFetcher` issues
    /// one fetch per task and does not fan this out itself (open question,
    /// see DESIGN.md).
    pub concurrency: usize,

    pub request_delay_ms: u64,
    pub user_agent: String,

    pub follow_redirects: bool,
    pub respect_nofollow: bool,
    pub ignore_robots_txt: bool,

    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,

    pub custom_url_filters: Vec<Regex>,
    pub file_extension_filters: FileExtensionFilters,
    pub technical_filters: TechnicalFilters,
    pub max_url_length: usize,

    pub normalize_urls_for_deduplication: bool,
    pub normalization: NormalizationPolicy,

    pub max_redirects: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: None,
            max_depth: None,
            max_concurrent_workers: 5,
            max_concurrent_requests: 10,
            concurrency: 4,
            request_delay_ms: 1000,
            user_agent: USER_AGENT.into(),
            follow_redirects: true,
            respect_nofollow: true,
            ignore_robots_txt: false,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            custom_url_filters: Vec::new(),
            file_extension_filters: FileExtensionFilters::default(),
            technical_filters: TechnicalFilters::default(),
            max_url_length: 2048,
            normalize_urls_for_deduplication: true,
            normalization: NormalizationPolicy::default(),
            max_redirects: 10,
        }
    }
}

/// Builder for [`CrawlerConfig`], mirroring the teacher's consuming-`self`
/// builder style.
#[derive(Debug, Clone, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.config.max_pages = Some(pages);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = Some(depth);
        self
    }

    pub fn with_max_concurrent_workers(mut self, workers: usize) -> Self {
        self.config.max_concurrent_workers = workers;
        self
    }

    pub fn with_max_concurrent_requests(mut self, requests: usize) -> Self {
        self.config.max_concurrent_requests = requests;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_request_delay_ms(mut self, ms: u64) -> Self {
        self.config.request_delay_ms = ms;
        self
    }

    pub fn with_user_agent<S: AsRef<str>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.as_ref().into();
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn with_respect_nofollow(mut self, respect: bool) -> Self {
        self.config.respect_nofollow = respect;
        self
    }

    pub fn with_ignore_robots_txt(mut self, ignore: bool) -> Self {
        self.config.ignore_robots_txt = ignore;
        self
    }

    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.config.allowed_domains = domains;
        self
    }

    pub fn with_blocked_domains(mut self, domains: Vec<String>) -> Self {
        self.config.blocked_domains = domains;
        self
    }

    pub fn with_custom_url_filters(mut self, filters: Vec<Regex>) -> Self {
        self.config.custom_url_filters = filters;
        self
    }

    pub fn with_file_extension_filters(mut self, filters: FileExtensionFilters) -> Self {
        self.config.file_extension_filters = filters;
        self
    }

    pub fn with_technical_filters(mut self, filters: TechnicalFilters) -> Self {
        self.config.technical_filters = filters;
        self
    }

    pub fn with_max_url_length(mut self, length: usize) -> Self {
        self.config.max_url_length = length;
        self
    }

    pub fn with_normalization(mut self, policy: NormalizationPolicy) -> Self {
        self.config.normalization = policy;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}
