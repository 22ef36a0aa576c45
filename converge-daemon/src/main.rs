//! Converge Ledger Daemon (`ledgerd`)
//!
//! Headless daemon exposing the append-only context store over gRPC.
//! The ledger is derivative: it remembers histories produced by an
//! external authoritative engine and losing its data never affects
//! that engine's correctness.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use converge_rpc::RpcServer;
use converge_store::{LedgerStore, MemoryBackend, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ledgerd", version, about = "Converge Ledger Daemon")]
struct Args {
    /// Port for the gRPC listener
    #[arg(long, env = "CONVERGE_PORT", default_value_t = 50051)]
    port: u16,

    /// Persistent storage root
    #[arg(long, env = "CONVERGE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Per-entry payload size cap in bytes
    #[arg(
        long,
        env = "CONVERGE_MAX_PAYLOAD_BYTES",
        default_value_t = converge_store::DEFAULT_MAX_PAYLOAD_BYTES
    )]
    max_payload_bytes: usize,

    /// Keep all state in memory (no durability)
    #[arg(long)]
    in_memory: bool,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!("ledgerd v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = StoreConfig {
        max_payload_bytes: args.max_payload_bytes,
        ..Default::default()
    };
    let store = if args.in_memory {
        tracing::info!("using in-memory tables");
        LedgerStore::new(Arc::new(MemoryBackend::new()), config)
    } else {
        tracing::info!("data directory: {}", args.data_dir.display());
        LedgerStore::open(&args.data_dir, config)?
    };

    let addr: SocketAddr = ([0, 0, 0, 0], args.port).into();
    let server = RpcServer::new(Arc::new(store), addr);

    tracing::info!("Daemon ready. Press Ctrl+C to stop.");
    server.run_until(shutdown_signal()).await?;

    tracing::info!("Daemon stopped");
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse().unwrap());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
    }
}
