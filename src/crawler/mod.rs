//! Crawler module for cursor-paginated, rate-limited listings
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with quota and throttle classification
//! - The rate budget decision made after every page
//! - Backoff scheduling against a pluggable clock
//! - The cursor crawl loop and the population estimator built on it

mod budget;
mod coordinator;
mod estimator;
mod fetcher;
mod progress;
mod scheduler;

pub use budget::{classify, RateDecision};
pub use coordinator::{CrawlEngine, CrawlOutcome};
pub use estimator::PopulationEstimate;
pub use fetcher::{build_http_client, FetchError, GitHubFetcher, PageFetcher};
pub use progress::{emit, CrawlProgress, ProgressCallback};
pub use scheduler::{BackoffScheduler, CancelToken, Clock, Interrupted, ManualClock, SystemClock};

use crate::config::Config;

/// Builds an engine that talks to the configured API on real time
///
/// This is the main entry point for the command-line tool. The returned
/// engine owns a fresh cancel token; wire it to a signal handler via
/// `CrawlEngine::cancel_token`.
///
/// # Errors
///
/// Returns an error if the base URL is invalid or the HTTP client cannot be
/// built.
pub fn build_engine(config: &Config) -> crate::Result<CrawlEngine<GitHubFetcher>> {
    let fetcher = GitHubFetcher::from_config(&config.api, &config.user_agent)?;
    Ok(CrawlEngine::from_config(fetcher, config))
}
