//! Page fetching against the remote listing API
//!
//! This module handles:
//! - The `PageFetcher` seam the crawl engine is written against
//! - Building HTTP clients with a proper user agent string
//! - Reading quota headers from every response
//! - Classifying failures into quota exhaustion, throttling and hard errors

use crate::config::{ApiConfig, UserAgentConfig};
use crate::state::{Cursor, EntityKind, Page, QuotaState, Record, ResetAt};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";
const HEADER_RETRY_AFTER: &str = "retry-after";

/// Classified failure of a single fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote reported zero remaining calls
    #[error("Quota exhausted, resets at {}", .quota.reset)]
    QuotaExhausted { quota: QuotaState },

    /// The remote throttled the request without reporting an exhausted quota
    #[error("Throttled by remote (retry after {retry_after:?})")]
    Throttled { retry_after: Option<Duration> },

    /// Any other failure: transport, non-quota 4xx/5xx, malformed payload
    #[error("{}", upstream_message(*.status, .message))]
    Upstream { status: Option<u16>, message: String },
}

fn upstream_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("HTTP {}: {}", status, message),
        None => message.to_string(),
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            "Request timeout".to_string()
        } else if e.is_connect() {
            format!("Connection failed: {}", e)
        } else {
            e.to_string()
        };
        FetchError::Upstream {
            status: e.status().map(|s| s.as_u16()),
            message,
        }
    }
}

/// Source of listing pages
///
/// Implementations must be idempotent: fetching the same cursor twice is
/// safe and returns the same records.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the page of `kind` records with identifiers strictly above `cursor`
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        page_size: u32,
    ) -> Result<Page, FetchError>;

    /// Reads the current quota without consuming it
    async fn fetch_quota(&self) -> Result<QuotaState, FetchError>;
}

#[async_trait]
impl<F: PageFetcher + ?Sized> PageFetcher for std::sync::Arc<F> {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        (**self).fetch_page(kind, cursor, page_size).await
    }

    async fn fetch_quota(&self) -> Result<QuotaState, FetchError> {
        (**self).fetch_quota().await
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use gh_census::config::{ApiConfig, UserAgentConfig};
/// use gh_census::crawler::build_http_client;
///
/// let user_agent = UserAgentConfig {
///     crawler_name: "gh-census".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&ApiConfig::default(), &user_agent).unwrap();
/// ```
pub fn build_http_client(
    api: &ApiConfig,
    user_agent: &UserAgentConfig,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

    Client::builder()
        .user_agent(user_agent.header_value())
        .default_headers(headers)
        .timeout(Duration::from_secs(api.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `PageFetcher` over the GitHub REST `since` listings
///
/// | Kind | Route |
/// |------|-------|
/// | Users | `GET /users?since=C&per_page=N` |
/// | Organizations | `GET /organizations?since=C&per_page=N` |
/// | Repositories | `GET /repositories?since=C` |
///
/// # Response classification
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx | page of records, quota from headers |
/// | 403/429 with `x-ratelimit-remaining: 0` | `QuotaExhausted` |
/// | 429, or 403 with `Retry-After` or a rate-limit message | `Throttled` |
/// | anything else | `Upstream` |
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    client: Client,
    base_url: Url,
}

impl GitHubFetcher {
    /// Creates a fetcher rooted at `base_url`
    pub fn new(client: Client, mut base_url: Url) -> Self {
        // Url::join replaces the last path segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    /// Builds the client and fetcher from configuration
    pub fn from_config(api: &ApiConfig, user_agent: &UserAgentConfig) -> crate::Result<Self> {
        let client = build_http_client(api, user_agent)?;
        let base_url = Url::parse(&api.base_url)?;
        Ok(Self::new(client, base_url))
    }

    /// Builds the listing URL for one page
    pub fn page_url(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        page_size: u32,
    ) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.join(kind.as_str())?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("since", &cursor.to_string());
            if kind.supports_page_size() {
                query.append_pair("per_page", &page_size.to_string());
            }
        }
        Ok(url)
    }

    async fn classify_failure(response: Response) -> FetchError {
        let status = response.status();
        let quota = quota_from_headers(response.headers());
        let retry_after = header_value::<u64>(response.headers(), HEADER_RETRY_AFTER)
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(quota) = quota.filter(QuotaState::is_exhausted) {
                return FetchError::QuotaExhausted { quota };
            }

            // A bare 403 is a permission problem, not a throttle
            if status == StatusCode::TOO_MANY_REQUESTS
                || retry_after.is_some()
                || body.to_ascii_lowercase().contains("rate limit")
            {
                return FetchError::Throttled { retry_after };
            }
        }

        FetchError::Upstream {
            status: Some(status.as_u16()),
            message: summarize_body(&body),
        }
    }
}

#[async_trait]
impl PageFetcher for GitHubFetcher {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let url = self.page_url(kind, cursor, page_size).map_err(|e| FetchError::Upstream {
            status: None,
            message: format!("Invalid page URL: {}", e),
        })?;
        tracing::trace!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let quota = quota_from_headers(response.headers()).unwrap_or_else(QuotaState::unreported);
        let status = response.status().as_u16();
        let items: Vec<Value> = response.json().await.map_err(|e| FetchError::Upstream {
            status: Some(status),
            message: format!("Malformed {} page: {}", kind, e),
        })?;

        let records = items
            .into_iter()
            .map(|item| {
                Record::from_value(kind, item).ok_or_else(|| FetchError::Upstream {
                    status: Some(status),
                    message: format!("{} page contains a record without a numeric id", kind),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page { records, quota })
    }

    async fn fetch_quota(&self) -> Result<QuotaState, FetchError> {
        let url = self.base_url.join("rate_limit").map_err(|e| FetchError::Upstream {
            status: None,
            message: format!("Invalid rate limit URL: {}", e),
        })?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }

        let body: RateLimitResponse = response.json().await?;
        let core = body.resources.core;
        Ok(QuotaState {
            limit: Some(core.limit),
            remaining: core.remaining,
            reset: ResetAt::new(core.reset.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitWindow,
}

#[derive(Debug, Deserialize)]
struct RateLimitWindow {
    limit: u32,
    remaining: u32,
    reset: u64,
}

/// Reads the quota headers, if the response carried them
fn quota_from_headers(headers: &HeaderMap) -> Option<QuotaState> {
    let remaining = header_value::<u32>(headers, HEADER_REMAINING)?;
    let reset = headers
        .get(HEADER_RESET)
        .and_then(|v| v.to_str().ok())
        .map(|s| ResetAt::new(s.trim()))
        .unwrap_or_else(|| ResetAt::new(""));

    Some(QuotaState {
        limit: header_value::<u32>(headers, HEADER_LIMIT),
        remaining,
        reset,
    })
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Extracts the `message` of a JSON error body, falling back to the raw text
fn summarize_body(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    if message.chars().count() > 200 {
        let truncated: String = message.chars().take(200).collect();
        format!("{}...", truncated)
    } else {
        message
    }
}
