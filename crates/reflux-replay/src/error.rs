//! Engine-surface error type.
//!
//! Transaction failures never appear here: they are recorded on the
//! failing flow itself. This type covers the synchronous entry points
//! (single-flow replay, configuration, capture loading).

use crate::flow::CaptureError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// The flow failed eligibility validation on the interactive path.
    #[error("{0}")]
    Ineligible(&'static str),
    /// Rejected concurrency option value; the previous limit stays in
    /// effect.
    #[error("Invalid replay concurrency {0}: expected -1 (unbounded) or a value >= 1")]
    InvalidConcurrency(i64),
    /// A capture file could not be loaded; nothing from the failing
    /// invocation was queued.
    #[error(transparent)]
    Capture(#[from] CaptureError),
}
