//! The `Fetcher` capability (spec §6): the only way the engine talks to the
//! network. Kept as a trait so tests can supply an in-memory fake instead of
//! hitting real hosts, and so the engine itself never depends on `reqwest`
//! directly outside this module.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Client;

use crate::config::{CrawlerConfig, RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_CAP_MS};

/// An outbound request, as seen by middleware and the fetcher.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }
}

/// The response the fetcher hands back, as seen by middleware and the
/// worker.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Post-redirect URL actually fetched.
    pub final_url: String,
}

impl FetchResponse {
    pub fn is_html(&self) -> bool {
        self.headers
            .get("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("html"))
            .unwrap_or(false)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Transient (worth retrying) vs permanent fetch failure. `status` carries
/// the HTTP status code when the transient failure was itself an HTTP
/// response (a 5xx) rather than a connection-level failure, so that an
/// escalation to `PermanentFetchError` after retries exhaust (spec §7) can
/// still report the status the caller actually saw.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("transient: {message}")]
    Transient { status: Option<u16>, message: String },
    #[error("permanent: {0}")]
    Permanent(String),
}

/// External HTTP transport capability (spec §6). Implementations must
/// follow redirects up to `max_redirects` when `follow_redirects` is set on
/// the request-issuing side; `ReqwestFetcher` configures this on its
/// `reqwest::Client`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Default `reqwest`-backed fetcher, with redirect cap, timeout, and
/// retry/backoff-with-jitter on transient failures (spec §4.8 step 6).
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
    retry_count: u32,
}

impl ReqwestFetcher {
    pub fn new(config: &CrawlerConfig) -> anyhow::Result<Self> {
        let redirect_policy = if config.follow_redirects {
            Policy::limited(config.max_redirects as usize)
        } else {
            Policy::none()
        };
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(redirect_policy)
            .timeout(crate::config::FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            timeout: crate::config::FETCH_TIMEOUT,
            retry_count: crate::config::FETCH_RETRY_COUNT,
        })
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut builder = self.client.get(&request.url).timeout(self.timeout);
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }
        builder = builder.headers(headers);

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        if (500..600).contains(&status) {
            return Err(FetchError::Transient {
                status: Some(status),
                message: format!("http {status}"),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&e))?
            .to_vec();

        Ok(FetchResponse {
            status,
            headers,
            body,
            final_url,
        })
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() {
        FetchError::Transient {
            status: None,
            message: e.to_string(),
        }
    } else {
        FetchError::Permanent(e.to_string())
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(request).await {
                Ok(response) => return Ok(response),
                Err(FetchError::Transient { status, message }) => {
                    if attempt >= self.retry_count {
                        return Err(FetchError::Transient { status, message });
                    }
                    let delay = backoff_with_jitter(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err @ FetchError::Permanent(_)) => return Err(err),
            }
        }
    }
}

/// Exponential backoff with jitter: base 500ms, cap 10s (spec §4.8). The
/// jittered result never exceeds `capped`, so it never exceeds the cap.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = RETRY_BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let capped = base.min(RETRY_BACKOFF_CAP_MS);
    let floor = capped.saturating_sub(capped / 8);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis((floor.saturating_add(jitter)).min(capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_cap() {
        for attempt in 0..10 {
            let d = backoff_with_jitter(attempt);
            assert!(d.as_millis() as u64 <= RETRY_BACKOFF_CAP_MS);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_before_capping() {
        let first = backoff_with_jitter(0);
        let later = backoff_with_jitter(5);
        assert!(later >= first);
    }
}
