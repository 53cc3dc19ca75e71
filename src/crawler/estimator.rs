//! Population estimation by doubling and bisection
//!
//! The listing API has no count endpoint, but "is the page at cursor C
//! non-empty" is cheap to ask. Probing at doubling cursors finds a cursor
//! beyond the last identifier; bisecting between the last non-empty and the
//! first empty probe then pins down the boundary.
//!
//! This assumes emptiness is monotone in the cursor: once a page is empty,
//! every page above it is empty too. That holds for an append-only id space.
//! Deleted entities leave gaps that can make a probe land on an empty stretch
//! below the true boundary, so the result is an approximation whenever
//! deletions cluster at the top of the id space.

use super::coordinator::CrawlEngine;
use super::fetcher::PageFetcher;
use super::progress::{emit, CrawlProgress};
use crate::state::{Cursor, EntityKind, QuotaState};

/// Outcome of a population estimate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationEstimate {
    /// Which listing was probed
    pub kind: EntityKind,

    /// Smallest probed cursor whose page was empty; under the monotone
    /// assumption this is the highest identifier in use
    pub boundary: u64,

    /// Populated probes, each of which doubled the search window
    pub doubling_probes: usize,

    /// Probes from the first empty one onwards
    pub bisection_probes: usize,

    /// Suspensions caused by quota exhaustion or throttling
    pub quota_waits: usize,
}

impl PopulationEstimate {
    /// Total fetches issued
    pub fn probes(&self) -> usize {
        self.doubling_probes + self.bisection_probes
    }
}

impl<F: PageFetcher> CrawlEngine<F> {
    /// Estimates how many `kind` identifiers are in use
    ///
    /// # Errors
    ///
    /// Same as `crawl_all`, except that a protocol violation cannot occur.
    pub async fn estimate_population(&self, kind: EntityKind) -> crate::Result<PopulationEstimate> {
        tracing::info!("Estimating {} population", kind);

        let mut budget = ProbeBudget::default();
        let mut doubling_probes = 0;
        let mut bisection_probes = 0;

        // `low` is the highest cursor known to have records above it. Zero is
        // assumed rather than probed; see the empty-population check below.
        let mut low = 0u64;
        let mut low_confirmed = false;
        let mut probe = self.estimate_config().initial_probe.max(1);

        let mut high = loop {
            if !self.is_populated_at(kind, probe, &mut budget).await? {
                bisection_probes += 1;
                break probe;
            }
            doubling_probes += 1;
            low = probe;
            low_confirmed = true;
            if probe == u64::MAX {
                break u64::MAX;
            }
            probe = probe.saturating_mul(2);
        };
        tracing::debug!("{} boundary is between {} and {}", kind, low, high);

        loop {
            let mid = low + (high - low) / 2;
            if mid == low {
                break;
            }
            bisection_probes += 1;
            if self.is_populated_at(kind, mid, &mut budget).await? {
                low = mid;
                low_confirmed = true;
            } else {
                high = mid;
            }
        }

        let boundary = if low_confirmed {
            high
        } else {
            // Every probe was empty; only cursor 0 can still tell an empty
            // population from one whose ids all sit below the first probe.
            bisection_probes += 1;
            if self.is_populated_at(kind, 0, &mut budget).await? {
                high
            } else {
                0
            }
        };

        let estimate = PopulationEstimate {
            kind,
            boundary,
            doubling_probes,
            bisection_probes,
            quota_waits: budget.quota_waits,
        };
        tracing::info!(
            "Estimated {} population boundary at {} after {} probes",
            kind,
            boundary,
            estimate.probes()
        );
        Ok(estimate)
    }

    /// Probes one cursor, first waiting out the quota the previous probe spent
    ///
    /// The last probe's quota is never acted on, so a finished estimate
    /// returns without waiting for a reset it does not need.
    async fn is_populated_at(
        &self,
        kind: EntityKind,
        cursor: u64,
        budget: &mut ProbeBudget,
    ) -> crate::Result<bool> {
        let cursor = Cursor(cursor);
        if let Some(quota) = budget.pending.take() {
            self.respect_budget(kind, &quota, cursor, &mut budget.quota_waits)
                .await?;
        }

        let page = self
            .fetch_with_backoff(kind, cursor, 1, &mut budget.quota_waits)
            .await?;
        let populated = !page.is_exhausted();
        tracing::debug!("Probe {} at cursor {}: populated={}", kind, cursor, populated);
        emit(
            self.progress(),
            CrawlProgress::Probed {
                kind,
                cursor,
                populated,
            },
        );

        budget.pending = Some(page.quota);
        Ok(populated)
    }
}

/// Quota carried from one probe to the next
#[derive(Debug, Default)]
struct ProbeBudget {
    quota_waits: usize,
    pending: Option<QuotaState>,
}
