mod activity;
mod config;
mod event;
mod protocol;
mod restart;
mod supervisor;
mod tick;
mod transport;
mod watch;
mod xmlrpc;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use crate::activity::ActivityFlag;
use crate::config::Config;
use crate::event::EventFilter;
use crate::protocol::ListenerChannel;
use crate::restart::RestartDispatcher;
use crate::supervisor::SupervisorRpc;
use crate::tick::TickLoop;
use crate::transport::HttpTransport;

#[tokio::main]
async fn main() {
    // ── Configuration ─────────────────────────────────────────────────────────
    let config = config::Args::parse().validate().unwrap_or_else(|e| e.exit());

    init_logging(config.verbose);

    let transport = match config::transport_from_env(|key| std::env::var(key).ok()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // ── Event loop ────────────────────────────────────────────────────────────
    tokio::select! {
        res = run(config, transport) => {
            if let Err(e) = res {
                tracing::error!("{e:#}");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
        }
    }
}

/// Installs the watch and drives the tick loop until the notification
/// channel fails.
async fn run(config: Config, transport: HttpTransport) -> Result<()> {
    let activity = Arc::new(ActivityFlag::new());
    let filter = EventFilter::new(config.mask, Arc::clone(&activity));
    let _watcher = watch::install(&config.paths, config.recursive, filter)?;

    tracing::info!(
        "fsevent-listener v{} started (server {:?}, targets {:?}, events {:?})",
        env!("CARGO_PKG_VERSION"),
        transport.endpoint(),
        config.targets,
        config.mask,
    );

    let dispatcher = RestartDispatcher::new(SupervisorRpc::new(transport), config.targets, config.dither);
    let channel = ListenerChannel::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    let mut tick_loop = TickLoop::new(channel, activity, dispatcher);

    tick_loop.run().await?;
    Ok(())
}

/// Diagnostics go to stderr: stdout carries the listener protocol.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
