//! Software broadcast hub for bench runs.
//!
//! Pure UDP forwarding in place of the radio channel: listens on one
//! port, rebroadcasts every frame to each node's ingress port with a
//! synthetic SNR estimate, and optionally drops a seeded fraction of
//! deliveries.
//!
//! ```bash
//! hub --port 50000 --nodes 3 --snr 16.0 --loss 0.1
//! ```

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::process::exit;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vraft_node::hub::{run_hub, HubConfig};

/// Broadcast-channel emulator.
#[derive(Parser, Debug)]
#[command(name = "hub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Port to listen on; nodes transmit here.
    #[arg(long, default_value = "50000")]
    port: u16,

    /// Number of nodes; ingress ports are port+1 ..= port+nodes.
    #[arg(long, default_value = "5")]
    nodes: u16,

    /// Injected mean SNR in dB.
    #[arg(long, default_value = "16.0")]
    snr: f32,

    /// Uniform SNR jitter in dB.
    #[arg(long, default_value = "1.0")]
    jitter: f32,

    /// Per-delivery drop probability.
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// Seed for jitter and loss draws.
    #[arg(long, default_value = "1")]
    seed: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = HubConfig {
        listen_port: cli.port,
        node_ports: (1..=cli.nodes).map(|i| cli.port + i).collect(),
        snr_mean: cli.snr,
        snr_jitter: cli.jitter,
        loss: cli.loss,
        seed: cli.seed,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if flag::register(SIGINT, shutdown.clone())
        .and(flag::register(SIGTERM, shutdown.clone()))
        .is_err()
    {
        eprintln!("fatal: cannot install signal handlers");
        exit(2);
    }

    match run_hub(config, &shutdown) {
        Ok(stats) => {
            println!(
                "forwarded {} frames ({} deliveries, {} dropped)",
                stats.frames_in, stats.deliveries, stats.dropped
            );
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            exit(1);
        }
    }
}
