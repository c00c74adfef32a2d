//! sonoflux service entry point.
//!
//! Wires the pieces the core treats as external collaborators: the YAML
//! configuration file, OS signals, the tracing subscriber, and process
//! exit codes. Fatal errors print `FATAL: <step>: <cause>` to stderr and
//! exit non-zero; exceeding the shutdown budget exits 1.

mod cli;
mod config;

use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sonoflux_core::audio::{AudioBackend, CpalBackend};
use sonoflux_core::Engine;

/// Bounded wait for a clean shutdown before forcing exit 1.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn fatal(step: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("FATAL: {step}: {err}");
    std::process::exit(1);
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn list_devices() -> ! {
    match CpalBackend::new().devices() {
        Ok(devices) if devices.is_empty() => {
            println!("no audio input devices found");
            std::process::exit(0);
        }
        Ok(devices) => {
            println!("audio input devices:");
            for d in devices {
                println!(
                    "  [{}] {}{} (max channels: {}, default rate: {} Hz)",
                    d.index,
                    d.name,
                    if d.is_default { " *default*" } else { "" },
                    d.max_input_channels,
                    d.default_sample_rate,
                );
            }
            std::process::exit(0);
        }
        Err(err) => fatal("failed to enumerate audio devices", err),
    }
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => fatal("failed to load configuration", err),
    };
    init_tracing(config.debug);

    if cli.list_devices {
        list_devices();
    }

    let engine = Engine::new(config);
    if let Err(err) = engine.initialize().await {
        fatal("failed to initialize engine", err);
    }

    // One cancellation token cascades from ctrl-c to the engine and,
    // through it, to every actor.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, initiating shutdown");
            let _ = cancel_tx.send(true);
        }
    });

    if let Err(err) = engine.run(cancel_rx).await {
        let _ = engine.close().await;
        fatal("failed to run engine", err);
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.close()).await {
        Ok(Ok(())) => info!("shutdown completed successfully"),
        Ok(Err(err)) => fatal("shutdown errors occurred", err),
        Err(_) => {
            eprintln!("FATAL: shutdown timeout exceeded, forcing exit");
            std::process::exit(1);
        }
    }
}
