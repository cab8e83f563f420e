//! Configuration types for the replay engine.

mod mode;
mod replay;

pub use mode::{HostPort, ProxyMode};
pub use replay::{ConcurrencyLimit, ReplayOptions, CONCURRENCY_UNBOUNDED};
