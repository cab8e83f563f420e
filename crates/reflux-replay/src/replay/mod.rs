//! Client replay engine.
//!
//! Replays previously captured client flows against their original (or
//! upstream-proxied) destinations and records the observed outcome back
//! onto each flow.
//!
//! # Module Structure
//!
//! - `scheduler` - ClientReplay engine: queue, dispatch, lifecycle
//! - `handler` - single replay transaction execution
//! - `check` - eligibility validation
//! - `codec` - HTTP/1 wire encoding and decoding
//! - `net` - outbound connection seam
//! - `tls` - client-side TLS

mod check;
mod codec;
mod handler;
mod net;
mod scheduler;
mod tls;

pub use check::check;
pub use net::{Connect, TcpConnector};
pub use scheduler::ClientReplay;
pub use tls::TlsFactory;

use crate::config::ProxyMode;
use std::sync::Arc;

/// Collaborator services a replay engine is constructed with: the
/// network layer, the TLS context provider, and the active proxy mode.
pub struct ReplayServices {
    pub connector: Arc<dyn Connect>,
    pub tls: Arc<TlsFactory>,
    pub mode: ProxyMode,
}

impl ReplayServices {
    pub fn new(connector: Arc<dyn Connect>, tls: Arc<TlsFactory>, mode: ProxyMode) -> Self {
        Self {
            connector,
            tls,
            mode,
        }
    }
}

impl Default for ReplayServices {
    /// Direct mode over plain TCP with verifying TLS.
    fn default() -> Self {
        Self::new(
            Arc::new(TcpConnector::default()),
            Arc::new(TlsFactory::new(true)),
            ProxyMode::Regular,
        )
    }
}
