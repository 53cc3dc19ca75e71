//! State module for crawl position, quota and records
//!
//! # Components
//!
//! - `Cursor` / `CrawlRange`: position in the identifier space and the span to enumerate
//! - `QuotaState` / `ResetAt`: remote-reported call budget and its reset time
//! - `Record` / `Page`: entities returned by one listing call

mod cursor;
mod quota;
mod record;

// Re-export main types
pub use cursor::{CrawlRange, Cursor};
pub use quota::{QuotaState, ResetAt};
pub use record::{EntityKind, Page, Record};
