//! Reflux client replay: re-send captured client flows against their
//! original (or upstream-proxied) destinations and record the outcome
//! back onto each flow.

// ===== Core modules =====
pub mod config;
pub mod error;
pub mod flow;
pub mod replay;

// Re-export the engine surface at the crate root
pub use config::{ConcurrencyLimit, HostPort, ProxyMode, ReplayOptions};
pub use error::ReplayError;
pub use flow::{Flow, FlowKind, Request, Response, Scheme, SharedFlow};
pub use replay::{ClientReplay, Connect, ReplayServices, TcpConnector, TlsFactory};
