//! Proxy-mode resolution.
//!
//! Decides which address a replay transaction dials: the flow's own
//! host:port in regular mode, or a configured upstream proxy that the
//! original destination is tunneled through.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `host:port` of an upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Active proxy mode for outbound replay traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Dial each flow's own destination directly.
    Regular,
    /// Dial the upstream proxy; the flow's destination becomes the
    /// tunnel target.
    Upstream(HostPort),
}

impl ProxyMode {
    /// Parse a mode spec: `regular`, or `upstream:http://host:port`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        if spec == "regular" {
            return Ok(ProxyMode::Regular);
        }
        let Some(url) = spec.strip_prefix("upstream:") else {
            return Err(format!(
                "Invalid mode '{spec}': expected 'regular' or 'upstream:http://host:port'"
            ));
        };

        let url_parts: Vec<&str> = url.splitn(2, "://").collect();
        if url_parts.len() != 2 {
            return Err(format!("Invalid upstream URL (missing scheme): {url}"));
        }
        if url_parts[0] != "http" {
            return Err(format!(
                "Unsupported upstream scheme '{}': only http upstreams are supported",
                url_parts[0]
            ));
        }

        let authority = url_parts[1].trim_end_matches('/');
        let (host, port) = authority.rsplit_once(':').ok_or_else(|| {
            format!("Invalid upstream address (missing port): {authority}")
        })?;
        if host.is_empty() {
            return Err(format!("Invalid upstream address (missing host): {authority}"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("Invalid upstream port: {port}"))?;

        Ok(ProxyMode::Upstream(HostPort {
            host: host.to_string(),
            port,
        }))
    }
}
