use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for gh-census
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub estimate: EstimateConfig,
}

/// Remote API endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the REST API
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Crawl loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Records requested per page (1..=100)
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Emit a progress notification every this many records
    #[serde(rename = "progress-every", default = "default_progress_every")]
    pub progress_every: usize,

    /// Drop forked repositories from repository crawls
    #[serde(rename = "skip-forks", default = "default_skip_forks")]
    pub skip_forks: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            progress_every: default_progress_every(),
            skip_forks: default_skip_forks(),
        }
    }
}

/// Quota backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Interval between reset checks while waiting out an exhausted quota (seconds)
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Single conservative wait after an unclassified throttle response (seconds)
    #[serde(rename = "cool-down-secs", default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

impl BackoffConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            cool_down_secs: default_cool_down_secs(),
        }
    }
}

/// Population estimator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EstimateConfig {
    /// First cursor probed in the doubling phase
    #[serde(rename = "initial-probe", default = "default_initial_probe")]
    pub initial_probe: u64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            initial_probe: default_initial_probe(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_progress_every() -> usize {
    1000
}

fn default_skip_forks() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_cool_down_secs() -> u64 {
    300
}

fn default_initial_probe() -> u64 {
    1
}
