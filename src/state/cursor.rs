use serde::{Deserialize, Serialize};
use std::fmt;

/// Pagination position: the identifier of the last record seen
///
/// Cursors are opaque to the crawl apart from ordering. A page fetched at
/// cursor `c` contains records whose identifiers are strictly greater than
/// `c`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor(pub u64);

impl Cursor {
    /// The cursor before any record
    pub const ORIGIN: Cursor = Cursor(0);

}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Cursor(value)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open interval `[start, end)` of cursor space to enumerate
///
/// `end` is a stopping condition, not a filter: a crawl stops once its
/// cursor reaches `end`, keeping every record of the page that crossed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlRange {
    /// Cursor the crawl starts from (exclusive of records at this id)
    pub start: Cursor,

    /// Stopping watermark; `None` crawls until the population is exhausted
    pub end: Option<Cursor>,
}

impl CrawlRange {
    /// Range covering the whole population
    pub fn unbounded() -> Self {
        Self {
            start: Cursor::ORIGIN,
            end: None,
        }
    }

    /// Range starting at `start` with no upper bound
    pub fn starting_at(start: impl Into<Cursor>) -> Self {
        Self {
            start: start.into(),
            end: None,
        }
    }

    /// Range `[start, end)`
    pub fn bounded(start: impl Into<Cursor>, end: impl Into<Cursor>) -> Self {
        Self {
            start: start.into(),
            end: Some(end.into()),
        }
    }

    /// Whether `cursor` has reached the stopping watermark
    pub fn is_covered_by(&self, cursor: Cursor) -> bool {
        self.end.is_some_and(|end| cursor >= end)
    }
}

impl Default for CrawlRange {
    fn default() -> Self {
        Self::unbounded()
    }
}
