use clap::error::ErrorKind;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;
use vraft_node::{build_options, run_node, Args};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            exit(0);
        }
        Err(e) => {
            let _ = e.print();
            exit(1);
        }
    };
    let options = match build_options(args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("configuration error: {e}");
            exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let interrupted = Arc::new(AtomicBool::new(false));
    let registered = flag::register(SIGTERM, shutdown.clone())
        .and(flag::register(SIGINT, shutdown.clone()))
        .and(flag::register(SIGINT, interrupted.clone()));
    if let Err(e) = registered {
        eprintln!("fatal: cannot install signal handlers: {e}");
        exit(2);
    }

    match run_node(options, shutdown) {
        Ok(artifact) => {
            if let Some(path) = artifact {
                println!("results: {}", path.display());
            }
            if interrupted.load(Ordering::Relaxed) {
                exit(130);
            }
        }
        Err(e) => {
            error!(error = %e, "fatal runtime error");
            eprintln!("fatal: {e}");
            exit(2);
        }
    }
}
