//! Replay engine options and the concurrency limit.

use crate::error::ReplayError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sentinel accepted by the concurrency option for "no limit".
pub const CONCURRENCY_UNBOUNDED: i64 = -1;

/// Reactive settings consumed by [`ClientReplay::configure`].
///
/// [`ClientReplay::configure`]: crate::replay::ClientReplay::configure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Capture files to load and replay. Empty list is a no-op.
    #[serde(default)]
    pub capture_files: Vec<PathBuf>,
    /// Maximum concurrent replay transactions: -1 for unbounded, or a
    /// value >= 1.
    #[serde(default = "default_concurrency")]
    pub concurrency: i64,
}

fn default_concurrency() -> i64 {
    CONCURRENCY_UNBOUNDED
}

/// Upper bound on simultaneously running replay transactions.
///
/// Changes apply to future dispatch decisions only; running transactions
/// are never preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    Unbounded,
    Bounded(usize),
}

impl ConcurrencyLimit {
    /// Validate an operator-supplied option value.
    pub fn from_option(value: i64) -> Result<Self, ReplayError> {
        match value {
            CONCURRENCY_UNBOUNDED => Ok(ConcurrencyLimit::Unbounded),
            n if n >= 1 => Ok(ConcurrencyLimit::Bounded(n as usize)),
            other => Err(ReplayError::InvalidConcurrency(other)),
        }
    }

    /// Whether another transaction may start while `running` are in flight.
    pub fn allows(&self, running: usize) -> bool {
        match self {
            ConcurrencyLimit::Unbounded => true,
            ConcurrencyLimit::Bounded(limit) => running < *limit,
        }
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        ConcurrencyLimit::Unbounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_option_accepts_unbounded_and_positive() {
        assert_eq!(
            ConcurrencyLimit::from_option(-1).unwrap(),
            ConcurrencyLimit::Unbounded
        );
        assert_eq!(
            ConcurrencyLimit::from_option(1).unwrap(),
            ConcurrencyLimit::Bounded(1)
        );
        assert_eq!(
            ConcurrencyLimit::from_option(16).unwrap(),
            ConcurrencyLimit::Bounded(16)
        );
    }

    #[test]
    fn test_from_option_rejects_zero_and_below_minus_one() {
        assert!(matches!(
            ConcurrencyLimit::from_option(0),
            Err(ReplayError::InvalidConcurrency(0))
        ));
        assert!(matches!(
            ConcurrencyLimit::from_option(-2),
            Err(ReplayError::InvalidConcurrency(-2))
        ));
    }

    #[test]
    fn test_allows() {
        assert!(ConcurrencyLimit::Unbounded.allows(10_000));
        assert!(ConcurrencyLimit::Bounded(2).allows(1));
        assert!(!ConcurrencyLimit::Bounded(2).allows(2));
    }
}
