//! Robots policy: per-authority `robots.txt` fetch/parse/cache (spec §4.3).
//!
//! Grounded on the teacher's own `robots_cache: RwLock<IndexMap<String,
//! RobotsCache>>` plus `DefaultMatcher::one_agent_allowed_by_robots`, widened
//! into a full policy object with the status-code handling matrix spec §4.3
//! describes and a single-flight fetch per authority.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use robotstxt::DefaultMatcher;
use tokio::sync::{Mutex, RwLock};

use crate::config::ROBOTS_FETCH_TIMEOUT;
use crate::fetcher::{FetchRequest, Fetcher};

/// Parsed (or synthesized) policy for one `scheme://host:port` authority.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    /// Raw `robots.txt` body, or empty for the synthesized allow-all/deny-all
    /// cases.
    content: String,
    crawl_delay: Option<Duration>,
    allow_all: bool,
    deny_all: bool,
    /// Whether this result may be cached for the engine's lifetime. A 5xx
    /// response is treated as temporary (spec §4.3 step 4): it is used for
    /// the query that triggered the fetch but never sealed into the cache,
    /// so the next query against the authority re-attempts the fetch.
    cacheable: bool,
}

impl RobotsPolicy {
    fn allow_all() -> Self {
        Self {
            content: String::new(),
            crawl_delay: None,
            allow_all: true,
            deny_all: false,
            cacheable: true,
        }
    }

    fn deny_all() -> Self {
        Self {
            content: String::new(),
            crawl_delay: None,
            allow_all: false,
            deny_all: true,
            cacheable: true,
        }
    }

    /// The conservative 5xx deny: treated as temporary, never cached.
    fn deny_all_transient() -> Self {
        Self {
            cacheable: false,
            ..Self::deny_all()
        }
    }

    fn parsed(content: String, crawl_delay: Option<Duration>) -> Self {
        Self {
            content,
            crawl_delay,
            allow_all: false,
            deny_all: false,
            cacheable: true,
        }
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    fn is_allowed(&self, user_agent: &str, url: &str) -> bool {
        if self.allow_all {
            return true;
        }
        if self.deny_all {
            return false;
        }
        DefaultMatcher::default().one_agent_allowed_by_robots(&self.content, user_agent, url)
    }
}

/// Answer to a [`RobotsCache::check`] query.
#[derive(Debug, Clone, Copy)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

/// Per-authority cache with single-flight fetch, keyed by
/// `scheme://host:port`. Cached for the lifetime of the engine (spec §9
/// notes the source has no explicit TTL and recommends engine-lifetime
/// caching), except for a 5xx result, which is never sealed in: the slot
/// stays `None` so the next query re-fetches (spec §4.3 step 4).
pub struct RobotsCache {
    entries: RwLock<IndexMap<String, Arc<Mutex<Option<RobotsPolicy>>>>>,
    user_agent: String,
    ignore_robots: bool,
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>, ignore_robots: bool) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            user_agent: user_agent.into(),
            ignore_robots,
        }
    }

    /// Query whether `url` may be fetched, fetching and caching
    /// `robots.txt` for its authority on first use. Fetch failures never
    /// surface to the caller; they collapse to the defaults in spec §4.3.
    pub async fn check(&self, url: &url::Url, fetcher: &dyn Fetcher) -> RobotsVerdict {
        if self.ignore_robots {
            return RobotsVerdict {
                allowed: true,
                crawl_delay: None,
            };
        }

        let Some(authority) = authority_of(url) else {
            return RobotsVerdict {
                allowed: false,
                crawl_delay: None,
            };
        };

        let slot = self.cell_for(&authority).await;
        let mut guard = slot.lock().await;
        if guard.is_none() {
            let fetched = fetch_and_parse(&authority, &self.user_agent, fetcher).await;
            if fetched.cacheable {
                *guard = Some(fetched);
            } else {
                // 5xx: answer this query with the transient denial but leave
                // the slot empty so the next caller re-fetches.
                let verdict = RobotsVerdict {
                    allowed: fetched.is_allowed(&self.user_agent, url.as_str()),
                    crawl_delay: fetched.crawl_delay(),
                };
                return verdict;
            }
        }
        let policy = guard.as_ref().expect("populated above");

        RobotsVerdict {
            allowed: policy.is_allowed(&self.user_agent, url.as_str()),
            crawl_delay: policy.crawl_delay(),
        }
    }

    async fn cell_for(&self, authority: &str) -> Arc<Mutex<Option<RobotsPolicy>>> {
        if let Some(cell) = self.entries.read().await.get(authority) {
            return cell.clone();
        }
        let mut entries = self.entries.write().await;
        entries
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

fn authority_of(url: &url::Url) -> Option<String> {
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Some(format!("{}://{}", url.scheme(), host)),
    }
}

async fn fetch_and_parse(authority: &str, user_agent: &str, fetcher: &dyn Fetcher) -> RobotsPolicy {
    let robots_url = format!("{authority}/robots.txt");
    let mut request = FetchRequest::new(robots_url.clone());
    request
        .headers
        .insert("User-Agent".to_string(), user_agent.to_string());

    let fetch = tokio::time::timeout(ROBOTS_FETCH_TIMEOUT, fetcher.fetch(&request)).await;

    match fetch {
        Err(_) => {
            tracing::debug!(authority, "robots.txt fetch timed out; allowing all");
            RobotsPolicy::allow_all()
        }
        Ok(Err(_)) => {
            tracing::debug!(authority, "robots.txt fetch failed; allowing all");
            RobotsPolicy::allow_all()
        }
        Ok(Ok(response)) => match response.status {
            404 | 410 => RobotsPolicy::allow_all(),
            401 | 403 => RobotsPolicy::deny_all(),
            500..=599 => {
                tracing::warn!(authority, status = response.status, "robots.txt 5xx; denying conservatively (not cached)");
                RobotsPolicy::deny_all_transient()
            }
            _ => {
                let body = String::from_utf8_lossy(&response.body).into_owned();
                let crawl_delay = extract_crawl_delay(&body, user_agent);
                RobotsPolicy::parsed(body, crawl_delay)
            }
        },
    }
}

/// Scan for a `Crawl-delay` directive. The `robotstxt` crate only matches
/// `Allow`/`Disallow`, so this is hand-parsed, the way the teacher and
/// several pack crawlers already do it.
fn extract_crawl_delay(content: &str, _user_agent: &str) -> Option<Duration> {
    let mut in_relevant_group = true;
    let mut found: Option<Duration> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, ':');
        let Some(field) = parts.next() else { continue };
        let Some(value) = parts.next() else { continue };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                in_relevant_group = value == "*" || value.eq_ignore_ascii_case(_user_agent);
            }
            "crawl-delay" if in_relevant_group => {
                if let Ok(secs) = value.parse::<f64>() {
                    found = Some(Duration::from_secs_f64(secs.max(0.0)));
                }
            }
            _ => {}
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::fetcher::{FetchError, FetchResponse};

    struct FlakyFetcher {
        status_sequence: Vec<u16>,
        call_count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Fetcher for FlakyFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let status = self
                .status_sequence
                .get(idx)
                .copied()
                .unwrap_or(*self.status_sequence.last().unwrap());
            Ok(FetchResponse {
                status,
                headers: std::collections::HashMap::new(),
                body: b"User-agent: *\nDisallow: /private\n".to_vec(),
                final_url: "https://example.com/robots.txt".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn a_5xx_robots_response_is_retried_on_the_next_query() {
        let fetcher = FlakyFetcher {
            status_sequence: vec![503, 200],
            call_count: AtomicUsize::new(0),
        };
        let cache = RobotsCache::new("TestBot", false);
        let url = url::Url::parse("https://example.com/private").unwrap();

        let first = cache.check(&url, &fetcher).await;
        assert!(!first.allowed, "5xx must deny conservatively");

        let second = cache.check(&url, &fetcher).await;
        assert!(!second.allowed, "the freshly-fetched robots.txt disallows /private");
        assert_eq!(
            fetcher.call_count.load(Ordering::SeqCst),
            2,
            "a 5xx result must not be cached; the second query must re-fetch"
        );
    }

    #[tokio::test]
    async fn a_2xx_robots_response_is_cached_and_not_refetched() {
        let fetcher = FlakyFetcher {
            status_sequence: vec![200],
            call_count: AtomicUsize::new(0),
        };
        let cache = RobotsCache::new("TestBot", false);
        let url = url::Url::parse("https://example.com/private").unwrap();

        cache.check(&url, &fetcher).await;
        cache.check(&url, &fetcher).await;

        assert_eq!(fetcher.call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extracts_crawl_delay_for_wildcard_agent() {
        let content = "User-agent: *\nDisallow: /admin\nCrawl-delay: 1\n";
        let delay = extract_crawl_delay(content, "AnyBot");
        assert_eq!(delay, Some(Duration::from_secs(1)));
    }

    #[test]
    fn ignores_crawl_delay_in_unrelated_group() {
        let content = "User-agent: OtherBot\nCrawl-delay: 30\nUser-agent: *\nDisallow: /\n";
        let delay = extract_crawl_delay(content, "MyBot");
        assert_eq!(delay, None);
    }

    #[test]
    fn authority_includes_explicit_port() {
        let url = url::Url::parse("https://example.com:8443/a").unwrap();
        assert_eq!(authority_of(&url).as_deref(), Some("https://example.com:8443"));
    }

    #[test]
    fn authority_omits_default_port() {
        let url = url::Url::parse("https://example.com/a").unwrap();
        assert_eq!(authority_of(&url).as_deref(), Some("https://example.com"));
    }
}
