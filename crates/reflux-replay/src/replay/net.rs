//! Network connection seam for replay transactions.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Outbound connection establishment.
///
/// Injected into the engine so tests and embedders can substitute the
/// transport. Failures (refusal, DNS, timeout) surface as `io::Error`
/// and are terminal for the transaction that hit them.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream>;
}

/// Default connector: plain TCP with an optional connect timeout.
///
/// The engine imposes no deadline of its own; a timeout configured here
/// propagates as a connection failure rather than a hang.
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Connect for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let connect = TcpStream::connect((host, port));
        match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connection to {host}:{port} timed out"),
                    )
                })?,
            None => connect.await,
        }
    }
}
