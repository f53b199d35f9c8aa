//! Worker pool & health monitor (spec section 4.8): the concurrent fetch/
//! parse/enqueue loop, plus a health monitor sweeping for stale workers,
//! oversized queues, high memory, and the deadlock canary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{
    CrawlerConfig, FAILURE_DETECTOR_INTERVAL, HEALTH_CHECK_INTERVAL, MEMORY_THRESHOLD_BYTES,
    QUEUE_SIZE_THRESHOLD, STALE_WORKER_THRESHOLD_MS, TASK_ACQUISITION_TIMEOUT,
};
use crate::error::{CrawlError, TaskOutcome};
use crate::extract::{extract_links, ExtractorConfig};
use crate::fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::filter::UrlFilter;
use crate::frontier::Frontier;
use crate::governor::{GovernorOutcome, HostGovernor};
use crate::meta::PageMetadataExtractor;
use crate::middleware::{MiddlewarePipeline, RequestOutcome, ResponseOutcome};
use crate::normalize::normalize;
use crate::robots::RobotsCache;
use crate::sink::{EmitOutcome, Sink};
use crate::types::{CrawlResult, CrawlTask, PageData};

/// Everything the worker loop and health monitor need, shared across all
/// workers via `Arc`.
pub struct WorkerContext {
    pub config: CrawlerConfig,
    pub frontier: Frontier,
    pub governor: HostGovernor,
    pub robots: RobotsCache,
    pub middleware: Arc<MiddlewarePipeline>,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<dyn Sink>,
    pub meta_extractor: Arc<dyn PageMetadataExtractor>,
    pub extractor_config: ExtractorConfig,
    pub emitted: AtomicUsize,
    pub in_flight_permits: Semaphore,
    pub cancel: CancellationToken,
    pub outcome_counts: Mutex<HashMap<&'static str, usize>>,
    pub pages_per_host: Mutex<HashMap<String, usize>>,
}

impl WorkerContext {
    async fn record_outcome(&self, outcome: &TaskOutcome) {
        let mut counts = self.outcome_counts.lock().await;
        *counts.entry(outcome.kind()).or_insert(0) += 1;
    }

    fn page_cap_reached(&self) -> bool {
        match self.config.max_pages {
            Some(max) => self.emitted.load(Ordering::SeqCst) >= max,
            None => false,
        }
    }

    /// Atomically reserve one emission slot against `max_pages`. Unlike
    /// `page_cap_reached` (a cheap, racy early-exit check), this is the gate
    /// that actually decides whether a result may be emitted: the check and
    /// the increment happen in one compare-exchange, so concurrent workers
    /// straddling the `sink.emit().await` suspension point can never reserve
    /// more slots than `max_pages` allows.
    fn try_reserve_emit_slot(&self) -> bool {
        let Some(max) = self.config.max_pages else {
            self.emitted.fetch_add(1, Ordering::SeqCst);
            return true;
        };
        let mut current = self.emitted.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return false;
            }
            match self.emitted.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Runs `max_concurrent_workers` worker loops plus one health monitor,
/// returning once every worker has exited (spec §4.8's termination signal).
pub struct WorkerPool;

impl WorkerPool {
    pub async fn run(ctx: Arc<WorkerContext>) {
        let worker_count = ctx.config.max_concurrent_workers.max(1);
        let last_progress: Arc<Vec<Mutex<Instant>>> = Arc::new(
            (0..worker_count)
                .map(|_| Mutex::new(Instant::now()))
                .collect(),
        );

        let monitor_ctx = ctx.clone();
        let monitor_progress = last_progress.clone();
        let monitor_cancel = ctx.cancel.clone();
        let monitor = tokio::spawn(async move {
            health_monitor(monitor_ctx, monitor_progress, monitor_cancel).await;
        });

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker_ctx = ctx.clone();
            let progress = last_progress.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(id, worker_ctx, progress).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        ctx.cancel.cancel();
        let _ = monitor.await;
    }
}

/// Drains exactly the single task already sitting in `ctx.frontier`, with no
/// worker pool and no health monitor, for [`crate::engine::Engine::crawl_single`].
/// Still runs through `process_task_inner` so robots/governor/middleware are
/// honoured identically to a frontier-driven crawl (spec §6).
pub async fn run_single_worker(ctx: Arc<WorkerContext>) {
    if let Some(task) = ctx.frontier.acquire_task(TASK_ACQUISITION_TIMEOUT).await {
        process_task(0, &ctx, task).await;
    }
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>, progress: Arc<Vec<Mutex<Instant>>>) {
    tracing::debug!(worker = id, "worker started");
    loop {
        if ctx.cancel.is_cancelled() {
            tracing::debug!(worker = id, "worker exiting: cancelled");
            return;
        }

        let task = tokio::select! {
            task = ctx.frontier.acquire_task(TASK_ACQUISITION_TIMEOUT) => task,
            _ = ctx.cancel.cancelled() => {
                tracing::debug!(worker = id, "worker exiting: cancelled while waiting");
                return;
            }
        };

        *progress[id].lock().await = Instant::now();

        let Some(task) = task else {
            if ctx.frontier.is_empty().await && ctx.frontier.outstanding() == 0 {
                tracing::debug!(worker = id, "worker exiting: frontier drained");
                return;
            }
            continue;
        };

        process_task(id, &ctx, task).await;
        *progress[id].lock().await = Instant::now();
    }
}

async fn process_task(id: usize, ctx: &Arc<WorkerContext>, task: CrawlTask) {
    let outcome = process_task_inner(ctx, &task).await;
    ctx.record_outcome(&outcome).await;
    match &outcome {
        TaskOutcome::Emitted => tracing::debug!(worker = id, url = %task.url, "emitted"),
        TaskOutcome::Dropped(e) => tracing::debug!(worker = id, url = %task.url, reason = %e, "dropped"),
        TaskOutcome::Failed(e) => tracing::warn!(worker = id, url = %task.url, error = %e, "failed"),
    }
    ctx.frontier.mark_terminal();
}

async fn process_task_inner(ctx: &Arc<WorkerContext>, task: &CrawlTask) -> TaskOutcome {
    // Step 2: global limits.
    if ctx.page_cap_reached() {
        ctx.cancel.cancel();
        return TaskOutcome::Dropped(CrawlError::FilteredUrl {
            reason: "max pages reached".into(),
        });
    }
    if let Some(max_depth) = ctx.config.max_depth {
        if task.depth > max_depth {
            return TaskOutcome::Dropped(CrawlError::FilteredUrl {
                reason: "max depth exceeded".into(),
            });
        }
    }

    let parsed = match Url::parse(&task.url) {
        Ok(u) => u,
        Err(e) => return TaskOutcome::Dropped(CrawlError::MalformedUrl(e.to_string())),
    };

    // Step 3: robots.
    let verdict = ctx.robots.check(&parsed, ctx.fetcher.as_ref()).await;
    if !verdict.allowed {
        return TaskOutcome::Dropped(CrawlError::RobotsDenied);
    }

    // Step 4: governor. The governor itself applies max(requestDelayMs,
    // crawlDelay) (spec §4.4); we only forward what robots.txt reported.
    let host = host_key(&parsed);
    match ctx.governor.acquire(&host, verdict.crawl_delay, &ctx.cancel).await {
        GovernorOutcome::Cancelled => return TaskOutcome::Dropped(CrawlError::EngineCancelled),
        GovernorOutcome::Proceed => {}
    }

    // Step 5: middleware(request).
    let request = FetchRequest::new(task.url.clone());
    let request = match ctx.middleware.run_request(request).await {
        RequestOutcome::Proceed(r) => r,
        RequestOutcome::Skip => {
            ctx.governor.release(&host).await;
            return TaskOutcome::Dropped(CrawlError::MiddlewareError("request skipped".into()));
        }
        RequestOutcome::Error(e) => {
            ctx.governor.release(&host).await;
            return TaskOutcome::Dropped(CrawlError::MiddlewareError(e));
        }
    };

    // Step 6: fetch, with global in-flight cap (maxConcurrentRequests).
    let start = Instant::now();
    let permit = ctx
        .in_flight_permits
        .acquire()
        .await
        .expect("in-flight semaphore is never closed");
    let fetch_result = ctx.fetcher.fetch(&request).await;
    drop(permit);
    ctx.governor.release(&host).await;

    let response = match fetch_result {
        Ok(r) => r,
        // `ReqwestFetcher` already retries transient failures internally
        // (spec §4.8 step 6); reaching here means retries were exhausted, so
        // this escalates TransientFetchError to PermanentFetchError (spec §7).
        Err(FetchError::Transient { status, message }) => {
            return escalate_to_permanent(ctx, &task, &host, status, message, start).await;
        }
        Err(FetchError::Permanent(message)) => {
            return escalate_to_permanent(ctx, &task, &host, None, message, start).await;
        }
    };

    // Redirect-target robots re-check (open question §9, "Recommended:
    // re-check").
    if response.final_url != task.url {
        if let Ok(final_parsed) = Url::parse(&response.final_url) {
            let redirect_verdict = ctx.robots.check(&final_parsed, ctx.fetcher.as_ref()).await;
            if !redirect_verdict.allowed {
                return TaskOutcome::Dropped(CrawlError::RobotsDenied);
            }
        }
    }

    // Step 7: middleware(response), reverse order.
    let response = match ctx.middleware.run_response(response, &request).await {
        ResponseOutcome::Proceed(r) => r,
        ResponseOutcome::Skip => {
            return TaskOutcome::Dropped(CrawlError::MiddlewareError("response skipped".into()));
        }
        ResponseOutcome::Error(e) => {
            return TaskOutcome::Dropped(CrawlError::MiddlewareError(e));
        }
    };

    if !response.is_success() {
        // Permanent fetch errors still reach the sink with their status
        // code (spec §7); links are not extracted.
        let page = build_page_data(&response, task.depth, start, None, Default::default());
        let emitted = emit(ctx, page, task, Vec::new()).await;
        *ctx.pages_per_host.lock().await.entry(host).or_insert(0) += 1;
        return emitted;
    }

    // Step 8: parse & extract, only for HTML 2xx responses.
    let mut discovered = Vec::new();
    let html_text = if response.is_html() {
        String::from_utf8_lossy(&response.body).into_owned()
    } else {
        String::new()
    };

    let (title, meta) = if response.is_html() {
        let extraction = extract_links(&html_text, &ctx.extractor_config);
        let base = Url::parse(&response.final_url).unwrap_or_else(|_| parsed.clone());
        let filter = UrlFilter::new(&ctx.config);

        for raw_link in extraction.links {
            discovered.push(raw_link.clone());
            if !ctx.config.normalize_urls_for_deduplication {
                continue;
            }
            let normalized = match normalize(&raw_link, Some(&base), &ctx.config.normalization) {
                Ok(n) => n,
                Err(_) => continue,
            };
            if !filter.check(&normalized.canonical).follow {
                continue;
            }
            let child = task.child(normalized.canonical);
            ctx.frontier.enqueue(child).await;
        }

        ctx.meta_extractor.extract(&html_text)
    } else {
        (None, Default::default())
    };

    let page = build_page_data(&response, task.depth, start, title, meta).with_html(html_text);

    let outcome = emit(ctx, page, task, discovered).await;
    *ctx.pages_per_host.lock().await.entry(host).or_insert(0) += 1;
    outcome
}

/// Spec §7: a transient fetch error that exhausted its retries (or a
/// non-retryable transport failure) escalates to `PermanentFetchError`. When
/// an HTTP status was actually observed (a 5xx that outlasted
/// `FETCH_RETRY_COUNT`), the sink still receives a `CrawlResult` carrying
/// that status so callers can observe the failure; a pure connection/DNS/
/// timeout failure never produced a status, so there is no well-formed page
/// to emit and the task is only counted as failed.
async fn escalate_to_permanent(
    ctx: &Arc<WorkerContext>,
    task: &CrawlTask,
    host: &str,
    status: Option<u16>,
    message: String,
    start: Instant,
) -> TaskOutcome {
    let Some(status) = status else {
        return TaskOutcome::Failed(CrawlError::PermanentFetchError { status, message });
    };

    let response = FetchResponse {
        status,
        headers: HashMap::new(),
        body: Vec::new(),
        final_url: task.url.clone(),
    };
    tracing::warn!(url = %task.url, status, message, "fetch retries exhausted; emitting failure page");
    let page = build_page_data(&response, task.depth, start, None, Default::default());
    let outcome = emit(ctx, page, task, Vec::new()).await;
    *ctx.pages_per_host.lock().await.entry(host.to_string()).or_insert(0) += 1;
    outcome
}

fn build_page_data(
    response: &FetchResponse,
    depth: usize,
    start: Instant,
    title: Option<String>,
    meta: indexmap::IndexMap<String, String>,
) -> PageData {
    PageData {
        url: response.final_url.clone(),
        status_code: response.status,
        headers: response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        html: String::new(),
        title,
        metadata: meta,
        fetched_at: chrono::Utc::now(),
        scrape_duration_ms: start.elapsed().as_millis() as u64,
        depth,
    }
}

trait WithHtml {
    fn with_html(self, html: String) -> Self;
}

impl WithHtml for PageData {
    fn with_html(mut self, html: String) -> Self {
        self.html = html;
        self
    }
}

async fn emit(
    ctx: &Arc<WorkerContext>,
    page: PageData,
    task: &CrawlTask,
    discovered: Vec<String>,
) -> TaskOutcome {
    if !ctx.try_reserve_emit_slot() {
        return TaskOutcome::Dropped(CrawlError::FilteredUrl {
            reason: "max pages reached".into(),
        });
    }

    let result = CrawlResult {
        depth: page.depth,
        metadata: task.metadata.clone(),
        page,
        discovered_links: discovered,
    };

    match ctx.sink.emit(result).await {
        EmitOutcome::Ok => TaskOutcome::Emitted,
        EmitOutcome::Cancelled => {
            // The reservation was spent but never delivered; give it back so
            // a later, successful emission can still use the slot.
            ctx.emitted.fetch_sub(1, Ordering::SeqCst);
            ctx.cancel.cancel();
            TaskOutcome::Failed(CrawlError::SinkError("sink cancelled".into()))
        }
    }
}

fn host_key(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (Some(h), None) => h.to_string(),
        _ => String::new(),
    }
}

async fn health_monitor(
    ctx: Arc<WorkerContext>,
    progress: Arc<Vec<Mutex<Instant>>>,
    cancel: CancellationToken,
) {
    let mut last_failure_sweep = Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => {}
            _ = cancel.cancelled() => return,
        }

        for (id, guard) in progress.iter().enumerate() {
            let last = *guard.lock().await;
            if last.elapsed() > Duration::from_millis(STALE_WORKER_THRESHOLD_MS) {
                tracing::warn!(worker = id, "worker stale; no progress observed recently");
            }
        }

        let queue_len = ctx.frontier.len().await;
        if queue_len > QUEUE_SIZE_THRESHOLD {
            tracing::warn!(queue_len, threshold = QUEUE_SIZE_THRESHOLD, "frontier over threshold");
        }

        if let Some(rss) = resident_memory_bytes() {
            if rss > MEMORY_THRESHOLD_BYTES {
                tracing::warn!(rss_bytes = rss, threshold = MEMORY_THRESHOLD_BYTES, "memory over threshold");
            }
        }

        if last_failure_sweep.elapsed() >= FAILURE_DETECTOR_INTERVAL {
            last_failure_sweep = Instant::now();
            let all_stale = futures::future::join_all(progress.iter().map(|g| async move {
                g.lock().await.elapsed() > Duration::from_millis(STALE_WORKER_THRESHOLD_MS)
            }))
            .await
            .into_iter()
            .all(|stale| stale);

            if all_stale && !ctx.frontier.is_empty().await {
                tracing::error!("deadlock canary tripped: all workers idle with non-empty frontier");
                ctx.cancel.cancel();
            }
        }
    }
}

/// Best-effort resident-set-size read from `/proc/self/status`. Returns
/// `None` on non-Linux platforms or if the file cannot be read/parsed.
fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
