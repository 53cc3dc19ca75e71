use crate::CensusError;
use chrono::{DateTime, Utc};
use std::fmt;

/// A reset timestamp exactly as the remote reported it
///
/// The raw text is kept until the backoff scheduler needs an instant, so a
/// malformed value surfaces as a recoverable fault at wait time instead of
/// failing the fetch that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAt(String);

impl ResetAt {
    /// Wraps a raw reset value
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw reported text
    pub fn raw(&self) -> &str {
        &self.0
    }

    /// Parses the reported reset time into a UTC instant
    ///
    /// Accepted formats:
    /// - Unix epoch seconds (`x-ratelimit-reset` header)
    /// - RFC 3339 (`2026-10-16T12:00:00Z`)
    /// - RFC 2822 (`Tue, 1 Jul 2003 10:52:37 +0200`)
    /// - `YYYY-MM-DD HH:MM:SS +HHMM`, optionally followed by a zone
    ///   abbreviation that is ignored in favour of the numeric offset
    ///
    /// # Errors
    ///
    /// Returns `CensusError::TimestampParseFault` when no format matches.
    pub fn parse(&self) -> Result<DateTime<Utc>, CensusError> {
        let raw = self.0.trim();
        let fault = || CensusError::TimestampParseFault {
            raw: self.0.clone(),
        };

        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            let secs: i64 = raw.parse().map_err(|_| fault())?;
            return DateTime::from_timestamp(secs, 0).ok_or_else(fault);
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        if let Ok(parsed) = DateTime::parse_from_rfc2822(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        // Numeric offset is authoritative; a trailing abbreviation such as
        // "PDT" is ambiguous across regions.
        let mut parts: Vec<&str> = raw.split_whitespace().collect();
        if parts.len() == 4 && parts[3].chars().all(|c| c.is_ascii_alphabetic()) {
            parts.pop();
        }
        DateTime::parse_from_str(&parts.join(" "), "%Y-%m-%d %H:%M:%S %z")
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| fault())
    }
}

impl From<DateTime<Utc>> for ResetAt {
    fn from(instant: DateTime<Utc>) -> Self {
        Self(instant.timestamp().to_string())
    }
}

impl fmt::Display for ResetAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote-reported call budget attached to a fetch response
///
/// Read fresh from every response; never cached beyond the backoff decision
/// it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    /// Total calls allowed per window, when reported
    pub limit: Option<u32>,

    /// Calls left in the current window
    pub remaining: u32,

    /// When `remaining` replenishes
    pub reset: ResetAt,
}

impl QuotaState {
    /// Creates a quota snapshot
    pub fn new(remaining: u32, reset: impl Into<ResetAt>) -> Self {
        Self {
            limit: None,
            remaining,
            reset: reset.into(),
        }
    }

    /// Placeholder for responses that carried no quota headers
    ///
    /// Never classified as exhausted.
    pub fn unreported() -> Self {
        Self {
            limit: None,
            remaining: u32::MAX,
            reset: ResetAt::new(""),
        }
    }

    /// Whether no calls are left before the reset
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}
