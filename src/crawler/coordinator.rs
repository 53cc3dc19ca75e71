//! Cursor crawl engine - the main crawl loop
//!
//! Walks a listing page by page, deriving each next cursor from the last
//! record of the previous page. Quota exhaustion suspends the loop through
//! the backoff scheduler and resumes at the same cursor; hard upstream
//! failures and non-advancing cursors abort the crawl with the cursor
//! reached, so an operator can restart from there.

use crate::config::{Config, CrawlConfig, EstimateConfig};
use crate::crawler::budget::{classify, RateDecision};
use crate::crawler::fetcher::{FetchError, PageFetcher};
use crate::crawler::progress::{crosses_milestone, emit, CrawlProgress, ProgressCallback};
use crate::crawler::scheduler::{BackoffScheduler, CancelToken, Clock, SystemClock};
use crate::state::{CrawlRange, Cursor, EntityKind, Page, QuotaState, Record, ResetAt};
use crate::CensusError;
use std::sync::Arc;

/// Result of a completed crawl
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// Which listing was crawled
    pub kind: EntityKind,

    /// Records in cursor order
    pub records: Vec<Record>,

    /// Cursor the crawl finished at; a follow-up crawl can start here
    pub last_cursor: Cursor,

    /// Successful fetches, including the terminating empty page
    pub pages_fetched: usize,

    /// Suspensions caused by quota exhaustion or throttling
    pub quota_waits: usize,
}

/// Drives a `PageFetcher` through a cursor range
///
/// One engine can serve several crawls at once (e.g. users and repositories
/// joined concurrently): every call keeps its own cursor and reads its own
/// quota, and only the cancel token is shared.
pub struct CrawlEngine<F> {
    fetcher: F,
    scheduler: BackoffScheduler,
    settings: CrawlConfig,
    estimate: EstimateConfig,
    preflight_quota: bool,
    cancel: CancelToken,
    on_progress: Option<ProgressCallback>,
}

impl<F: PageFetcher> CrawlEngine<F> {
    /// Creates an engine with explicit settings
    pub fn new(fetcher: F, settings: CrawlConfig, scheduler: BackoffScheduler) -> Self {
        Self {
            fetcher,
            scheduler,
            settings,
            estimate: EstimateConfig::default(),
            preflight_quota: true,
            cancel: CancelToken::new(),
            on_progress: None,
        }
    }

    /// Creates an engine on real time from a loaded configuration
    pub fn from_config(fetcher: F, config: &Config) -> Self {
        Self::with_clock(fetcher, config, Arc::new(SystemClock))
    }

    /// Creates an engine from a loaded configuration on the given clock
    pub fn with_clock(fetcher: F, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let scheduler = BackoffScheduler::from_config(clock, &config.backoff);
        Self::new(fetcher, config.crawl.clone(), scheduler)
            .with_estimate_config(config.estimate.clone())
    }

    /// Sets the estimator configuration
    pub fn with_estimate_config(mut self, estimate: EstimateConfig) -> Self {
        self.estimate = estimate;
        self
    }

    /// Shares an externally owned cancel token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Installs a progress observer
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Whether to probe the quota before the first page
    pub fn with_preflight_quota(mut self, enabled: bool) -> Self {
        self.preflight_quota = enabled;
        self
    }

    /// Token that cancels every crawl running on this engine
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The fetcher this engine drives
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub(super) fn estimate_config(&self) -> &EstimateConfig {
        &self.estimate
    }

    pub(super) fn progress(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_ref()
    }

    /// Enumerates every `kind` record in `range`
    ///
    /// The crawl stops at the first empty page, or as soon as the cursor
    /// reaches `range.end`. Every record of the page that crossed `end` is
    /// kept. With `skip-forks` set, forked repositories are dropped after the
    /// cursor has been advanced past them.
    ///
    /// # Errors
    ///
    /// * `CensusError::Upstream` - a fetch failed for a reason other than quota
    /// * `CensusError::ProtocolViolation` - a page did not advance the cursor
    /// * `CensusError::Cancelled` - the cancel token was triggered
    pub async fn crawl_all(
        &self,
        kind: EntityKind,
        range: CrawlRange,
    ) -> crate::Result<CrawlOutcome> {
        self.check_cancelled(range.start)?;

        tracing::info!(
            "Starting {} crawl from cursor {} to {}",
            kind,
            range.start,
            range.end.map_or_else(|| "end of population".to_string(), |end| end.to_string())
        );
        emit(self.progress(), CrawlProgress::Started { kind, range });

        let mut quota_waits = 0;
        if self.preflight_quota {
            self.preflight(kind, range.start, &mut quota_waits).await?;
        }

        let mut cursor = range.start;
        let mut records: Vec<Record> = Vec::new();
        let mut pages_fetched = 0;

        loop {
            let page = self
                .fetch_with_backoff(kind, cursor, self.settings.page_size, &mut quota_waits)
                .await?;
            pages_fetched += 1;

            let Some(next) = page.last_cursor() else {
                tracing::debug!("Empty {} page at cursor {}, population exhausted", kind, cursor);
                break;
            };

            if next <= cursor {
                tracing::error!(
                    "{} page at cursor {} ended at {}, refusing to loop",
                    kind,
                    cursor,
                    next
                );
                return Err(CensusError::ProtocolViolation {
                    previous: cursor,
                    next,
                });
            }

            let Page {
                records: page_records,
                quota,
            } = page;
            let fetched = page_records.len();
            let before = records.len();
            records.extend(
                page_records
                    .into_iter()
                    .filter(|record| !(self.settings.skip_forks && record.is_fork())),
            );
            cursor = next;

            tracing::debug!(
                "Fetched {} {} ({} kept), cursor now {}, {} calls left",
                fetched,
                kind,
                records.len() - before,
                cursor,
                quota.remaining
            );
            self.report_progress(kind, before, records.len(), cursor);

            if range.is_covered_by(cursor) {
                tracing::debug!("Cursor {} reached end of range", cursor);
                break;
            }

            self.respect_budget(kind, &quota, cursor, &mut quota_waits).await?;
        }

        tracing::info!(
            "Finished {} crawl: {} records over {} pages, last cursor {}, {} quota waits",
            kind,
            records.len(),
            pages_fetched,
            cursor,
            quota_waits
        );
        emit(
            self.progress(),
            CrawlProgress::Finished {
                kind,
                count: records.len(),
                last_cursor: cursor,
            },
        );

        Ok(CrawlOutcome {
            kind,
            records,
            last_cursor: cursor,
            pages_fetched,
            quota_waits,
        })
    }

    /// Fetches the page at `cursor`, absorbing quota exhaustion
    ///
    /// | Failure | Action |
    /// |---------|--------|
    /// | `QuotaExhausted` | wait for the reset, retry the same cursor |
    /// | first `Throttled` | one cool-down, re-read the quota, retry once |
    /// | second `Throttled` | `CensusError::Upstream` |
    /// | `Upstream` | `CensusError::Upstream` |
    ///
    /// Records are only returned from a successful fetch, so retries can
    /// never duplicate them.
    pub(super) async fn fetch_with_backoff(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        page_size: u32,
        quota_waits: &mut usize,
    ) -> crate::Result<Page> {
        let mut throttle_retried = false;

        loop {
            self.check_cancelled(cursor)?;

            match self.fetcher.fetch_page(kind, cursor, page_size).await {
                Ok(page) => return Ok(page),
                Err(FetchError::QuotaExhausted { quota }) => {
                    let transient = CensusError::TransientQuotaExceeded {
                        reset: quota.reset.clone(),
                    };
                    tracing::warn!("{} fetch at cursor {}: {}", kind, cursor, transient);
                    *quota_waits += 1;
                    self.wait_for_reset(kind, &quota.reset, cursor).await?;
                }
                Err(FetchError::Throttled { retry_after }) if !throttle_retried => {
                    throttle_retried = true;
                    *quota_waits += 1;
                    self.scheduler
                        .cool_down(retry_after, &self.cancel)
                        .await
                        .map_err(|_| CensusError::Cancelled { cursor })?;
                    self.refresh_quota(kind, cursor, quota_waits).await?;
                }
                Err(err) => {
                    tracing::error!("Fetching {} at cursor {} failed: {}", kind, cursor, err);
                    return Err(CensusError::Upstream {
                        cursor,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Suspends before the next fetch if the last response spent the quota
    pub(super) async fn respect_budget(
        &self,
        kind: EntityKind,
        quota: &QuotaState,
        cursor: Cursor,
        quota_waits: &mut usize,
    ) -> crate::Result<()> {
        if let RateDecision::MustWaitUntil(reset) = classify(quota) {
            *quota_waits += 1;
            self.wait_for_reset(kind, &reset, cursor).await?;
        }
        Ok(())
    }

    async fn preflight(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        quota_waits: &mut usize,
    ) -> crate::Result<()> {
        match self.fetcher.fetch_quota().await {
            Ok(quota) => {
                tracing::info!(
                    "Quota before crawl: {} of {} calls left",
                    quota.remaining,
                    quota.limit.map_or_else(|| "?".to_string(), |l| l.to_string())
                );
                self.respect_budget(kind, &quota, cursor, quota_waits).await
            }
            Err(e) => {
                tracing::warn!("Could not read quota before crawl: {}", e);
                Ok(())
            }
        }
    }

    /// Re-reads the real quota after a cool-down and waits if it is spent
    async fn refresh_quota(
        &self,
        kind: EntityKind,
        cursor: Cursor,
        quota_waits: &mut usize,
    ) -> crate::Result<()> {
        match self.fetcher.fetch_quota().await {
            Ok(quota) => self.respect_budget(kind, &quota, cursor, quota_waits).await,
            Err(FetchError::QuotaExhausted { quota }) => {
                self.respect_budget(kind, &quota, cursor, quota_waits).await
            }
            Err(e) => {
                tracing::warn!("Could not re-read quota after cool-down: {}", e);
                Ok(())
            }
        }
    }

    async fn wait_for_reset(
        &self,
        kind: EntityKind,
        reset: &ResetAt,
        cursor: Cursor,
    ) -> crate::Result<()> {
        emit(
            self.progress(),
            CrawlProgress::WaitingForQuota {
                kind,
                cursor,
                reset: reset.clone(),
            },
        );

        let ticks = self
            .scheduler
            .wait_until(reset, &self.cancel)
            .await
            .map_err(|_| CensusError::Cancelled { cursor })?;

        // A reset that is already past (or unreadable) would otherwise turn
        // a still-exhausted quota into a hot retry loop.
        if ticks == 0 {
            self.scheduler
                .pause(&self.cancel)
                .await
                .map_err(|_| CensusError::Cancelled { cursor })?;
        }
        Ok(())
    }

    fn check_cancelled(&self, cursor: Cursor) -> crate::Result<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!("Cancellation requested at cursor {}", cursor);
            return Err(CensusError::Cancelled { cursor });
        }
        Ok(())
    }

    fn report_progress(&self, kind: EntityKind, before: usize, after: usize, cursor: Cursor) {
        if crosses_milestone(before, after, self.settings.progress_every) {
            tracing::info!("Crawled {} {} (cursor {})", after, kind, cursor);
            emit(
                self.progress(),
                CrawlProgress::Milestone {
                    kind,
                    count: after,
                    last_cursor: cursor,
                },
            );
        }
    }
}
