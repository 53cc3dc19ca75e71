//! Rate budget classification
//!
//! Turns the quota reported with a fetch into a go/wait decision. No clock
//! arithmetic happens here; the reset time is passed through untouched for
//! the backoff scheduler to interpret.

use crate::state::{QuotaState, ResetAt};

/// Whether the next request may be issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// Calls remain in the current window
    Proceed,

    /// The window is spent; no request before the reported reset
    MustWaitUntil(ResetAt),
}

/// Classifies a quota snapshot
///
/// Returns `MustWaitUntil` iff `remaining == 0`.
pub fn classify(quota: &QuotaState) -> RateDecision {
    if quota.is_exhausted() {
        RateDecision::MustWaitUntil(quota.reset.clone())
    } else {
        RateDecision::Proceed
    }
}
