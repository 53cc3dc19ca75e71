//! Advisory progress notifications for long crawls
//!
//! Observers are optional and never influence the crawl: a missing callback
//! is a no-op and a slow one only delays its own notification.

use crate::state::{CrawlRange, Cursor, EntityKind, ResetAt};

/// Events emitted while a crawl or estimate runs
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlProgress {
    /// A crawl started
    Started { kind: EntityKind, range: CrawlRange },

    /// The accumulated record count crossed a multiple of the progress cadence
    Milestone {
        kind: EntityKind,
        count: usize,
        last_cursor: Cursor,
    },

    /// The crawl is suspended until the quota resets
    WaitingForQuota {
        kind: EntityKind,
        cursor: Cursor,
        reset: ResetAt,
    },

    /// An estimator probe completed
    Probed {
        kind: EntityKind,
        cursor: Cursor,
        populated: bool,
    },

    /// A crawl completed
    Finished {
        kind: EntityKind,
        count: usize,
        last_cursor: Cursor,
    },
}

/// Callback receiving progress events
pub type ProgressCallback = Box<dyn Fn(CrawlProgress) + Send + Sync>;

/// Emits an event if a callback is installed
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: CrawlProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

/// Whether growing from `before` to `after` records crosses a multiple of `every`
pub(crate) fn crosses_milestone(before: usize, after: usize, every: usize) -> bool {
    every > 0 && after / every > before / every
}
