//! Integration tests for the client replay engine.
//!
//! Each test spawns a real TCP listener standing in for the replay
//! target (or the upstream proxy) and asserts the bytes the engine puts
//! on the wire as well as the outcome recorded on the flow.

use reflux_replay::{
    ClientReplay, Connect, Flow, FlowKind, HostPort, ProxyMode, ReplayServices, Request, Scheme,
    SharedFlow, TcpConnector, TlsFactory,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_test::traced_test;

fn tengine(mode: ProxyMode) -> ClientReplay {
    ClientReplay::new(ReplayServices::new(
        Arc::new(TcpConnector::default()),
        Arc::new(TlsFactory::new(true)),
        mode,
    ))
}

fn trequest(host: &str, port: u16) -> Request {
    Request {
        method: "GET".into(),
        scheme: Scheme::Http,
        host: host.into(),
        port,
        path: "/path".into(),
        headers: vec![
            ("header".into(), "qvalue".into()),
            ("content-length".into(), "4".into()),
        ],
        content: Some(b"data".to_vec()),
        host_header: Some("example.reflux.dev".into()),
    }
}

fn tflow(host: &str, port: u16) -> SharedFlow {
    Flow::http(trequest(host, port)).shared()
}

async fn bind_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Read from the peer until the buffered bytes end with `needle`.
async fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await.expect("server read failed");
        assert!(n > 0, "connection closed before expected bytes arrived");
        buf.extend_from_slice(&chunk[..n]);
        if buf.ends_with(needle) {
            return buf;
        }
    }
}

async fn wait_for_drain(engine: &ClientReplay) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "replay batch did not drain in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_direct_replay_records_response() {
    // Bounded and unbounded dispatch must agree on the final state.
    for concurrency in [-1i64, 1] {
        let (listener, addr) = bind_listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let wire = read_until(&mut stream, b"data").await;
            assert_eq!(
                wire,
                b"GET /path HTTP/1.1\r\n\
                  header: qvalue\r\n\
                  content-length: 4\r\n\
                  Host: example.reflux.dev\r\n\
                  \r\n\
                  data"
            );
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
        });

        let engine = tengine(ProxyMode::Regular);
        engine.set_concurrency(concurrency).unwrap();
        engine.running();

        let flow = tflow(&addr.ip().to_string(), addr.port());
        engine.start_replay([Arc::clone(&flow)]);
        assert_eq!(engine.count(), 1);

        wait_for_drain(&engine).await;
        server.await.unwrap();

        let flow = flow.lock();
        assert!(flow.error.is_none(), "unexpected error: {:?}", flow.error);
        let response = flow.response.as_ref().expect("response not recorded");
        assert_eq!(response.status_code, 204);
        assert_eq!(response.reason, "No Content");
        drop(flow);
        engine.done().await;
    }
}

#[tokio::test]
async fn test_upstream_plaintext_uses_absolute_form() {
    let (listener, addr) = bind_listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let wire = read_until(&mut stream, b"data").await;
        assert!(
            wire.starts_with(b"GET http://address:22/path HTTP/1.1\r\n"),
            "unexpected request line: {:?}",
            String::from_utf8_lossy(&wire)
        );
        stream
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
    });

    let engine = tengine(ProxyMode::Upstream(HostPort {
        host: addr.ip().to_string(),
        port: addr.port(),
    }));
    engine.running();

    // The flow's own destination is unreachable; only the upstream is
    // dialed.
    let flow = tflow("address", 22);
    engine.start_replay([Arc::clone(&flow)]);

    wait_for_drain(&engine).await;
    server.await.unwrap();

    let flow = flow.lock();
    assert!(flow.error.is_none(), "unexpected error: {:?}", flow.error);
    assert_eq!(flow.response.as_ref().unwrap().status_code, 204);
    drop(flow);
    engine.done().await;
}

#[tokio::test]
async fn test_upstream_connect_refusal_sets_error() {
    let (listener, addr) = bind_listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let wire = read_until(&mut stream, b"\r\n\r\n").await;
        assert_eq!(
            wire,
            b"CONNECT address:22 HTTP/1.1\r\nHost: address:22\r\n\r\n"
        );
        stream
            .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
            .await
            .unwrap();
    });

    let engine = tengine(ProxyMode::Upstream(HostPort {
        host: addr.ip().to_string(),
        port: addr.port(),
    }));
    engine.running();

    let flow = tflow("address", 22);
    flow.lock().request.as_mut().unwrap().scheme = Scheme::Https;
    engine.start_replay([Arc::clone(&flow)]);
    assert_eq!(engine.count(), 1);

    wait_for_drain(&engine).await;
    server.await.unwrap();

    let flow = flow.lock();
    assert!(flow.response.is_none());
    assert_eq!(
        flow.error.as_deref(),
        Some(
            format!(
                "Upstream proxy {}:{} refused HTTP CONNECT request: 502 Bad Gateway",
                addr.ip(),
                addr.port()
            )
            .as_str()
        )
    );
    drop(flow);
    engine.done().await;
}

#[tokio::test]
async fn test_connection_refused_is_recorded_on_the_flow() {
    // Bind then drop to get a port with nothing listening.
    let (listener, addr) = bind_listener().await;
    drop(listener);

    let engine = tengine(ProxyMode::Regular);
    engine.running();

    let flow = tflow(&addr.ip().to_string(), addr.port());
    engine.start_replay([Arc::clone(&flow)]);
    wait_for_drain(&engine).await;

    let flow = flow.lock();
    assert!(flow.response.is_none());
    let error = flow.error.as_deref().expect("connect failure not recorded");
    assert!(
        error.starts_with("Failed to connect to"),
        "unexpected error: {error}"
    );
    drop(flow);
    engine.done().await;
}

#[tokio::test]
async fn test_bounded_dispatch_preserves_order_and_completes() {
    let (listener, addr) = bind_listener().await;
    let server = tokio::spawn(async move {
        // One connection at a time: the engine must not need a second
        // slot to finish the batch.
        for _ in 0..3 {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_until(&mut stream, b"data").await;
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .await
                .unwrap();
        }
    });

    let engine = tengine(ProxyMode::Regular);
    engine.set_concurrency(1).unwrap();
    engine.running();

    let flows: Vec<SharedFlow> = (0..3)
        .map(|_| tflow(&addr.ip().to_string(), addr.port()))
        .collect();
    engine.start_replay(flows.iter().cloned());
    assert_eq!(engine.count(), 3);

    wait_for_drain(&engine).await;
    server.await.unwrap();

    for flow in &flows {
        let flow = flow.lock();
        assert_eq!(flow.response.as_ref().unwrap().status_code, 204);
        assert!(flow.error.is_none());
    }
    engine.done().await;
}

#[tokio::test]
async fn test_stop_replay_zeroes_count_and_interrupts_inflight() {
    let (listener, addr) = bind_listener().await;
    tokio::spawn(async move {
        // Accept and read, but never answer: the transaction stays
        // blocked on the response read until cancelled.
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut sink = [0u8; 256];
                while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
            });
        }
    });

    let engine = tengine(ProxyMode::Regular);
    engine.set_concurrency(1).unwrap();
    engine.running();

    let flows: Vec<SharedFlow> = (0..3)
        .map(|_| tflow(&addr.ip().to_string(), addr.port()))
        .collect();
    engine.start_replay(flows.iter().cloned());
    assert_eq!(engine.count(), 3);

    // Give the first transaction time to get blocked on its read.
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.stop_replay();
    assert_eq!(engine.count(), 0);

    // Cancelled and never-started flows are left exactly as captured.
    for flow in &flows {
        let flow = flow.lock();
        assert!(flow.response.is_none());
        assert!(flow.error.is_none());
    }

    tokio::time::timeout(Duration::from_secs(5), engine.done())
        .await
        .expect("done() hung on cancelled transactions");
}

struct PanickingConnector;

#[async_trait::async_trait]
impl Connect for PanickingConnector {
    async fn connect(&self, _host: &str, _port: u16) -> io::Result<TcpStream> {
        panic!("oops");
    }
}

#[tokio::test]
#[traced_test]
async fn test_transaction_crash_is_isolated() {
    let engine = ClientReplay::new(ReplayServices::new(
        Arc::new(PanickingConnector),
        Arc::new(TlsFactory::new(true)),
        ProxyMode::Regular,
    ));
    engine.running();

    let flow = tflow("example.com", 80);
    engine.start_replay([Arc::clone(&flow)]);
    wait_for_drain(&engine).await;

    assert!(logs_contain("Client replay has crashed!"));
    assert!(logs_contain("oops"));

    // The crashed flow is dropped from tracking with no recorded
    // outcome.
    {
        let flow = flow.lock();
        assert!(flow.response.is_none());
        assert!(flow.error.is_none());
    }

    // The engine keeps accepting work after a crash.
    engine.start_replay([tflow("example.com", 80)]);
    assert_eq!(engine.count(), 1);
    wait_for_drain(&engine).await;
    engine.done().await;
}

#[tokio::test]
async fn test_load_file_counts_eligible_flows_only() {
    use std::io::Write;

    let eligible_a = Flow::http(trequest("example.com", 80));
    let eligible_b = Flow::http(trequest("example.com", 81));
    let mut websocket = Flow::http(trequest("example.com", 82));
    websocket.kind = FlowKind::WebSocket;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    let json = serde_json::to_string(&vec![eligible_a, eligible_b, websocket]).unwrap();
    file.write_all(json.as_bytes()).unwrap();

    // Not marked running: loaded flows stay queued and countable.
    let engine = tengine(ProxyMode::Regular);
    engine.load_file(file.path()).unwrap();
    assert_eq!(engine.count(), 2);

    let err = engine.load_file("/nonexistent/capture.json").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/capture.json"));
    assert_eq!(engine.count(), 2);

    engine.stop_replay();
    assert_eq!(engine.count(), 0);
    engine.done().await;
}
