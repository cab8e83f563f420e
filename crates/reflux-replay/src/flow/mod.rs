//! Captured flow model.
//!
//! A [`Flow`] is one captured client exchange: the request as it appeared
//! on the wire, and (after a replay attempt) either the observed response
//! or a human-readable error. Flows are shared between the caller and the
//! replay engine as [`SharedFlow`] handles; the engine mutates a flow in
//! place and the caller observes the outcome through its own handle.

mod capture;

pub use capture::{load, CaptureError};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handle to a captured flow. Exactly one replay transaction
/// mutates a flow at a time; callers keep their own handle to observe
/// the outcome.
pub type SharedFlow = Arc<Mutex<Flow>>;

/// Protocol kind of a captured flow.
///
/// Closed set: the eligibility validator matches exhaustively, so adding
/// a kind is a compile-time change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Http,
    Tcp,
    Udp,
    WebSocket,
}

/// URL scheme of a captured request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured request as a client produced it.
///
/// Headers keep their original wire order and are replayed verbatim.
/// `content: None` means the body was never captured (such a flow is not
/// replayable), while `Some(vec![])` is an empty body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    /// Explicit `Host` header override. Used as the TLS server name and
    /// appended to the emitted headers when no `Host` was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_header: Option<String>,
}

impl Request {
    /// `host:port` form, as used for CONNECT targets and absolute URIs.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Server name used for SNI: the explicit host-header override when
    /// present, otherwise the original host.
    pub fn sni_host(&self) -> &str {
        self.host_header.as_deref().unwrap_or(&self.host)
    }
}

/// Response observed during a successful replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub reason: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
}

/// One captured exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: FlowKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Currently flowing through an active proxy session. Never replayable.
    #[serde(default)]
    pub live: bool,
    /// Held for manual operator edits. Not replayable while held.
    #[serde(default)]
    pub intercepted: bool,
}

impl Flow {
    /// Create an HTTP flow around a captured request.
    pub fn http(request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: FlowKind::Http,
            request: Some(request),
            response: None,
            error: None,
            live: false,
            intercepted: false,
        }
    }

    /// Wrap into the shared handle the replay engine works with.
    pub fn shared(self) -> SharedFlow {
        Arc::new(Mutex::new(self))
    }
}
