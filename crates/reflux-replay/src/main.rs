//! Reflux replay CLI.
//!
//! Loads one or more capture files, replays every eligible flow against
//! its original (or upstream-proxied) destination, and prints a per-flow
//! outcome summary.

use clap::Parser;
use reflux_replay::{
    ClientReplay, ProxyMode, ReplayOptions, ReplayServices, TcpConnector, TlsFactory,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reflux-replay")]
#[command(about = "Replay captured client flows against their original destinations")]
struct Args {
    /// Capture files to replay
    #[arg(required = true)]
    captures: Vec<PathBuf>,

    /// Maximum concurrent replays (-1 = unbounded)
    #[arg(short = 'n', long, default_value_t = -1, allow_negative_numbers = true)]
    concurrency: i64,

    /// Proxy mode: 'regular' or 'upstream:http://host:port'
    #[arg(long, default_value = "regular")]
    mode: String,

    /// Skip TLS certificate verification (development/testing only)
    #[arg(long)]
    insecure: bool,

    /// Connect timeout in seconds (0 disables the timeout)
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mode = ProxyMode::parse(&args.mode).map_err(|e| anyhow::anyhow!(e))?;
    let connect_timeout = match args.connect_timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let services = ReplayServices::new(
        Arc::new(TcpConnector::new(connect_timeout)),
        Arc::new(TlsFactory::new(!args.insecure)),
        mode,
    );
    let engine = ClientReplay::new(services);
    engine.running();

    let flows = engine.configure(&ReplayOptions {
        capture_files: args.captures,
        concurrency: args.concurrency,
    })?;
    info!("Replaying {} flow(s)", flows.len());

    while engine.count() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    engine.done().await;

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for flow in &flows {
        let flow = flow.lock();
        let Some(request) = &flow.request else {
            continue;
        };
        let url = format!(
            "{}://{}{}",
            request.scheme,
            request.authority(),
            request.path
        );
        match (&flow.response, &flow.error) {
            (Some(response), _) => {
                succeeded += 1;
                println!(
                    "{} {} -> {} {}",
                    request.method, url, response.status_code, response.reason
                );
            }
            (None, Some(error)) => {
                failed += 1;
                println!("{} {} -> failed: {}", request.method, url, error);
            }
            (None, None) => {
                failed += 1;
                println!("{} {} -> no outcome recorded", request.method, url);
            }
        }
    }
    info!("Replay finished: {succeeded} succeeded, {failed} failed");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
