//! Replay transaction execution.
//!
//! A [`ReplayHandler`] performs exactly one outbound conversation for one
//! eligible flow: resolve the target per the active proxy mode, connect,
//! tunnel and handshake as needed, emit the captured request, read the
//! response, and record the outcome on the flow. Failures are recorded as
//! `flow.error` and never escape to the scheduler.

use super::codec::{self, CodecError, RequestForm};
use super::net::Connect;
use super::tls::TlsFactory;
use super::ReplayServices;
use crate::config::ProxyMode;
use crate::flow::{Request, Response, Scheme, SharedFlow};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Error)]
enum TransactionError {
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("Upstream proxy {proxy} refused HTTP CONNECT request: {status_line}")]
    TunnelRefused { proxy: String, status_line: String },
    #[error("TLS handshake with {server_name} failed: {source}")]
    Tls {
        server_name: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read replayed response: {0}")]
    Response(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Executes one replay transaction for one flow.
pub(crate) struct ReplayHandler {
    flow: SharedFlow,
    connector: Arc<dyn Connect>,
    tls: Arc<TlsFactory>,
    mode: ProxyMode,
}

impl ReplayHandler {
    pub(crate) fn new(flow: SharedFlow, services: &ReplayServices) -> Self {
        Self {
            flow,
            connector: Arc::clone(&services.connector),
            tls: Arc::clone(&services.tls),
            mode: services.mode.clone(),
        }
    }

    /// Replay the flow and record the outcome on it.
    ///
    /// At completion exactly one of `flow.response` / `flow.error` is
    /// set; a transaction cancelled mid-flight leaves the flow exactly
    /// as captured. The flow lock is never held across I/O.
    pub(crate) async fn replay(self) {
        let request = {
            let flow = self.flow.lock();
            match &flow.request {
                Some(request) => request.clone(),
                // Guarded by eligibility validation upstream.
                None => return,
            }
        };
        debug!(
            "Replaying {} {}://{}{}",
            request.method,
            request.scheme,
            request.authority(),
            request.path
        );

        match self.transact(&request).await {
            Ok(response) => {
                debug!(
                    "Replay of {} finished: {} {}",
                    request.authority(),
                    response.status_code,
                    response.reason
                );
                self.flow.lock().response = Some(response);
            }
            Err(err) => {
                debug!("Replay of {} failed: {err}", request.authority());
                self.flow.lock().error = Some(err.to_string());
            }
        }
    }

    async fn transact(&self, request: &Request) -> Result<Response, TransactionError> {
        let (target_host, target_port) = match &self.mode {
            ProxyMode::Regular => (request.host.as_str(), request.port),
            ProxyMode::Upstream(addr) => (addr.host.as_str(), addr.port),
        };
        let mut stream = self
            .connector
            .connect(target_host, target_port)
            .await
            .map_err(|source| TransactionError::Connect {
                target: format!("{target_host}:{target_port}"),
                source,
            })?;

        if let ProxyMode::Upstream(addr) = &self.mode {
            if request.scheme == Scheme::Https {
                let authority = request.authority();
                stream
                    .write_all(&codec::assemble_connect(&authority))
                    .await?;
                let (code, status_line) = codec::read_tunnel_response_head(&mut stream).await?;
                if !(200..300).contains(&code) {
                    return Err(TransactionError::TunnelRefused {
                        proxy: addr.to_string(),
                        status_line,
                    });
                }
                debug!("Tunnel to {authority} established via {addr}");
            }
        }

        match request.scheme {
            Scheme::Https => {
                let server_name = request.sni_host().to_owned();
                let tls_stream = self
                    .tls
                    .wrap(stream, &server_name)
                    .await
                    .map_err(|source| TransactionError::Tls {
                        server_name,
                        source,
                    })?;
                self.exchange(tls_stream, request, RequestForm::Origin).await
            }
            Scheme::Http => {
                let form = match &self.mode {
                    ProxyMode::Upstream(_) => RequestForm::Absolute,
                    ProxyMode::Regular => RequestForm::Origin,
                };
                self.exchange(stream, request, form).await
            }
        }
    }

    async fn exchange<S>(
        &self,
        mut stream: S,
        request: &Request,
        form: RequestForm,
    ) -> Result<Response, TransactionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(&codec::assemble_request(request, form))
            .await?;
        stream.flush().await?;
        let response = codec::read_response(&mut stream, &request.method).await?;
        let _ = stream.shutdown().await;
        Ok(response)
    }
}
