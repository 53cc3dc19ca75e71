//! gh-census: bulk enumeration of GitHub users, organizations and repositories
//!
//! This crate walks the `since`-cursor list endpoints of a paginated,
//! rate-limited API page by page, suspending on quota exhaustion and
//! resuming without skipping or duplicating records. It can also estimate
//! the size of an entity population without enumerating it.

pub mod config;
pub mod crawler;
pub mod state;

use state::ResetAt;
use thiserror::Error;

/// Main error type for gh-census operations
#[derive(Debug, Error)]
pub enum CensusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Quota exhausted, resets at {reset}")]
    TransientQuotaExceeded { reset: ResetAt },

    #[error("Upstream error at cursor {cursor}: {message}")]
    Upstream { cursor: Cursor, message: String },

    #[error("Protocol violation: page ended at cursor {next}, which does not advance past {previous}")]
    ProtocolViolation { previous: Cursor, next: Cursor },

    #[error("Unparsable reset timestamp: {raw:?}")]
    TimestampParseFault { raw: String },

    #[error("Crawl cancelled at cursor {cursor}")]
    Cancelled { cursor: Cursor },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),
}

impl CensusError {
    /// Returns the cursor an operator can resume from, if the error carries one
    pub fn resume_cursor(&self) -> Option<Cursor> {
        match self {
            Self::Upstream { cursor, .. } | Self::Cancelled { cursor } => Some(*cursor),
            Self::ProtocolViolation { previous, .. } => Some(*previous),
            _ => None,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for gh-census operations
pub type Result<T> = std::result::Result<T, CensusError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CancelToken, CrawlEngine, CrawlOutcome, GitHubFetcher, PopulationEstimate};
pub use state::{CrawlRange, Cursor, EntityKind, Page, QuotaState, Record};
