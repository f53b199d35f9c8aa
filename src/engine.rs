//! Engine / orchestrator (spec §4.8, §6): ties the frontier, governor,
//! robots cache, middleware pipeline, fetcher, and worker pool together, and
//! drives the `Idle -> Running -> Draining -> Stopped` lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::CrawlerConfig;
use crate::extract::ExtractorConfig;
use crate::fetcher::{Fetcher, ReqwestFetcher};
use crate::frontier::Frontier;
use crate::governor::HostGovernor;
use crate::meta::{PageMetadataExtractor, ScraperMetadataExtractor};
use crate::middleware::{Middleware, MiddlewarePipeline};
use crate::normalize::{normalize, NormalizedUrl};
use crate::pool::{run_single_worker, WorkerContext, WorkerPool};
use crate::robots::RobotsCache;
use crate::sink::Sink;
use crate::types::{CrawlTask, Metadata};

/// Engine lifecycle state (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// A seed the caller hands to [`Engine::crawl`]: a bare URL, or a URL with
/// caller metadata propagated to every descendant task (spec §3 `CrawlTask`).
#[derive(Debug, Clone)]
pub struct Seed {
    pub url: String,
    pub metadata: Metadata,
}

impl From<&str> for Seed {
    fn from(url: &str) -> Self {
        Self {
            url: url.to_string(),
            metadata: Metadata::new(),
        }
    }
}

impl From<String> for Seed {
    fn from(url: String) -> Self {
        Self {
            url,
            metadata: Metadata::new(),
        }
    }
}

impl From<(String, Metadata)> for Seed {
    fn from((url, metadata): (String, Metadata)) -> Self {
        Self { url, metadata }
    }
}

/// Per-kind tallies plus the engine's final state, returned once a crawl
/// completes (spec §7: "the engine's outer result summarizes counts per
/// kind"; SPEC_FULL.md §B adds elapsed wall time and a pages-per-host
/// breakdown).
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub final_state: EngineState,
    pub pages_emitted: usize,
    pub outcome_counts: HashMap<&'static str, usize>,
    pub elapsed: Duration,
    pub pages_per_host: HashMap<String, usize>,
}

/// Options for [`Engine::crawl_single`]: a one-shot fetch that bypasses the
/// frontier but still honours middleware, robots, and the governor (spec
/// §6).
#[derive(Debug, Clone, Default)]
pub struct SingleCrawlOptions {
    pub metadata: Metadata,
}

/// Builder for [`Engine`], mirroring the teacher's consuming-`self`
/// `CrawlerBuilder` shape, but building from the full [`CrawlerConfig`]
/// rather than four fields.
pub struct EngineBuilder {
    config: CrawlerConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    middlewares: Vec<Box<dyn Middleware>>,
    meta_extractor: Option<Arc<dyn PageMetadataExtractor>>,
    extractor_config: ExtractorConfig,
}

impl EngineBuilder {
    pub fn new(config: CrawlerConfig) -> Self {
        Self {
            config,
            fetcher: None,
            middlewares: Vec::new(),
            meta_extractor: None,
            extractor_config: ExtractorConfig::default(),
        }
    }

    /// Override the default `reqwest`-backed fetcher, e.g. with a test fake.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Register a middleware layer. Request middlewares run in registration
    /// order; response middlewares run in reverse (spec §4.6).
    pub fn with_middleware(mut self, middleware: Box<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_meta_extractor(mut self, extractor: Arc<dyn PageMetadataExtractor>) -> Self {
        self.meta_extractor = Some(extractor);
        self
    }

    pub fn with_extractor_config(mut self, config: ExtractorConfig) -> Self {
        self.extractor_config = config;
        self
    }

    /// Consumes the builder and returns a configured [`Engine`]. Mirrors the
    /// teacher's fallible `CrawlerBuilder::build` (constructing the
    /// `reqwest::Client` can fail).
    pub fn build(self) -> anyhow::Result<Engine> {
        let fetcher = match self.fetcher {
            Some(f) => f,
            None => Arc::new(ReqwestFetcher::new(&self.config)?),
        };
        let mut pipeline = MiddlewarePipeline::new();
        for middleware in self.middlewares {
            pipeline.push(middleware);
        }
        let mut extractor_config = self.extractor_config;
        extractor_config.respect_nofollow = self.config.respect_nofollow;
        Ok(Engine {
            config: self.config,
            fetcher,
            middleware: Arc::new(pipeline),
            meta_extractor: self
                .meta_extractor
                .unwrap_or_else(|| Arc::new(ScraperMetadataExtractor)),
            extractor_config,
            state: StdMutex::new(EngineState::Idle),
        })
    }
}

/// Owns every component shared across runs (config, fetcher, middleware
/// pipeline). `crawl`/`crawl_single` each construct a fresh frontier, seen
/// set, and worker pool per call, the way the teacher's `start()`
/// constructs a fresh `visited`/`content` pair per call.
pub struct Engine {
    config: CrawlerConfig,
    fetcher: Arc<dyn Fetcher>,
    middleware: Arc<MiddlewarePipeline>,
    meta_extractor: Arc<dyn PageMetadataExtractor>,
    extractor_config: ExtractorConfig,
    state: StdMutex<EngineState>,
}

impl Engine {
    /// Construct an engine with the default `reqwest` fetcher and no
    /// middleware. For anything beyond defaults, use [`EngineBuilder`].
    pub fn new(config: CrawlerConfig) -> anyhow::Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap() = state;
    }

    fn new_context(&self, sink: Arc<dyn Sink>, cancel: CancellationToken) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            frontier: Frontier::new(),
            governor: HostGovernor::new(Duration::from_millis(self.config.request_delay_ms)),
            robots: RobotsCache::new(
                self.config.user_agent.clone(),
                self.config.ignore_robots_txt,
            ),
            middleware: self.middleware.clone(),
            fetcher: self.fetcher.clone(),
            sink,
            meta_extractor: self.meta_extractor.clone(),
            extractor_config: self.extractor_config.clone(),
            emitted: AtomicUsize::new(0),
            in_flight_permits: Semaphore::new(self.config.max_concurrent_requests),
            cancel,
            outcome_counts: Mutex::new(HashMap::new()),
            pages_per_host: Mutex::new(HashMap::new()),
            config: self.config.clone(),
        })
    }

    async fn summarize(&self, ctx: &Arc<WorkerContext>, start: tokio::time::Instant) -> RunSummary {
        self.set_state(EngineState::Draining);
        let outcome_counts = ctx.outcome_counts.lock().await.clone();
        let pages_per_host = ctx.pages_per_host.lock().await.clone();
        let pages_emitted = ctx.emitted.load(Ordering::SeqCst);
        self.set_state(EngineState::Stopped);
        RunSummary {
            final_state: self.state(),
            pages_emitted,
            outcome_counts,
            elapsed: start.elapsed(),
            pages_per_host,
        }
    }

    /// Enqueue `seeds`, run the worker pool to completion, and return a
    /// summary. Normalizes and filters each seed exactly as a discovered
    /// link would be (spec §2: "seeds -> normalize/filter/dedup ->
    /// frontier").
    pub async fn crawl(&self, seeds: Vec<Seed>, sink: Arc<dyn Sink>) -> anyhow::Result<RunSummary> {
        self.set_state(EngineState::Running);
        let start = tokio::time::Instant::now();
        let ctx = self.new_context(sink, CancellationToken::new());

        for seed in seeds {
            self.enqueue_seed(&ctx, seed).await;
        }

        WorkerPool::run(ctx.clone()).await;
        Ok(self.summarize(&ctx, start).await)
    }

    /// One-shot fetch bypassing the frontier, still honouring middleware,
    /// robots, and the governor (spec §6 `crawlSingle`).
    pub async fn crawl_single(
        &self,
        url: &str,
        sink: Arc<dyn Sink>,
        options: SingleCrawlOptions,
    ) -> anyhow::Result<RunSummary> {
        self.set_state(EngineState::Running);
        let start = tokio::time::Instant::now();
        let ctx = self.new_context(sink, CancellationToken::new());

        let task = CrawlTask::seed(url.to_string(), options.metadata);
        ctx.frontier.enqueue(task).await;

        run_single_worker(ctx.clone()).await;
        Ok(self.summarize(&ctx, start).await)
    }

    async fn enqueue_seed(&self, ctx: &Arc<WorkerContext>, seed: Seed) {
        let filter = crate::filter::UrlFilter::new(&self.config);
        let normalized: Option<NormalizedUrl> = if self.config.normalize_urls_for_deduplication {
            normalize(&seed.url, None, &self.config.normalization).ok()
        } else {
            Some(NormalizedUrl {
                original: seed.url.clone(),
                canonical: seed.url.clone(),
                host: String::new(),
            })
        };

        let Some(normalized) = normalized else {
            tracing::debug!(url = %seed.url, "seed rejected: malformed");
            return;
        };

        if !filter.check(&normalized.canonical).follow {
            tracing::debug!(url = %normalized.canonical, "seed rejected by filter");
            return;
        }

        ctx.frontier
            .enqueue(CrawlTask::seed(normalized.canonical, seed.metadata))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, FetchRequest, FetchResponse};
    use crate::sink::VecSink;
    use std::collections::HashMap as StdHashMap;

    struct FakeFetcher {
        html_by_url: StdHashMap<String, String>,
    }

    #[async_trait::async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            if request.url.ends_with("/robots.txt") {
                return Ok(FetchResponse {
                    status: 404,
                    headers: StdHashMap::new(),
                    body: Vec::new(),
                    final_url: request.url.clone(),
                });
            }
            match self.html_by_url.get(&request.url) {
                Some(html) => Ok(FetchResponse {
                    status: 200,
                    headers: StdHashMap::from([(
                        "content-type".to_string(),
                        "text/html".to_string(),
                    )]),
                    body: html.as_bytes().to_vec(),
                    final_url: request.url.clone(),
                }),
                None => Ok(FetchResponse {
                    status: 404,
                    headers: StdHashMap::new(),
                    body: Vec::new(),
                    final_url: request.url.clone(),
                }),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn crawl_single_bypasses_frontier_but_still_emits_one_result() {
        let mut html_by_url = StdHashMap::new();
        html_by_url.insert(
            "https://example.com/".to_string(),
            "<html><body>hello</body></html>".to_string(),
        );
        let engine = EngineBuilder::new(CrawlerConfig::default())
            .with_fetcher(Arc::new(FakeFetcher { html_by_url }))
            .build()
            .unwrap();

        let (sink, mut rx) = crate::sink::ChannelSink::new(4);
        let summary = engine
            .crawl_single(
                "https://example.com/",
                Arc::new(sink),
                SingleCrawlOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(summary.final_state, EngineState::Stopped);
        assert_eq!(summary.pages_emitted, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn crawl_drains_a_small_reachable_graph() {
        let mut html_by_url = StdHashMap::new();
        html_by_url.insert(
            "https://example.com/".to_string(),
            r#"<html><body><a href="/a">a</a><a href="/b">b</a></body></html>"#.to_string(),
        );
        html_by_url.insert(
            "https://example.com/a".to_string(),
            "<html><body>leaf a</body></html>".to_string(),
        );
        html_by_url.insert(
            "https://example.com/b".to_string(),
            "<html><body>leaf b</body></html>".to_string(),
        );
        let mut config = CrawlerConfig::default();
        config.max_concurrent_workers = 2;
        let engine = EngineBuilder::new(config)
            .with_fetcher(Arc::new(FakeFetcher { html_by_url }))
            .build()
            .unwrap();

        let sink = Arc::new(VecSink::new());
        let summary = engine
            .crawl(vec![Seed::from("https://example.com/")], sink)
            .await
            .unwrap();

        assert_eq!(summary.pages_emitted, 3);
        assert_eq!(summary.final_state, EngineState::Stopped);
        assert_eq!(summary.pages_per_host.get("example.com"), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn disallowed_seed_never_reaches_the_fetcher() {
        let html_by_url = StdHashMap::new();
        let mut config = CrawlerConfig::default();
        config.allowed_domains = vec!["other.example".to_string()];
        let engine = EngineBuilder::new(config)
            .with_fetcher(Arc::new(FakeFetcher { html_by_url }))
            .build()
            .unwrap();

        let sink = Arc::new(VecSink::new());
        let summary = engine
            .crawl(vec![Seed::from("https://example.com/")], sink)
            .await
            .unwrap();

        assert_eq!(summary.pages_emitted, 0);
    }
}
