//! netwatchd
//!
//! Watches a single file and notifies TCP subscribers of every change.

use clap::Parser;
use color_eyre::eyre::Result;
use netwatchd::cli::Cli;
use netwatchd::config::Config;
use netwatchd::server::{BroadcastServer, ServerOptions};
use netwatchd::state::ServerState;
use netwatchd::watcher::{FileWatchSource, WatchTarget};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref())?.with_cli(&cli);

    init_logging(&config.server.log_level)?;

    // Everything that can fail at startup happens before the socket is bound
    let target = WatchTarget::resolve(config.watch_path()?)?;
    let source = FileWatchSource::open(target, &config.watch)?;
    let state = Arc::new(ServerState::new(source));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %state.target().path().display(),
        "Starting netwatchd"
    );

    let server = BroadcastServer::bind(
        config.server.listen_addr(),
        state,
        ServerOptions::from(&config.server),
    )
    .await?;

    server.run(shutdown_signal()).await;

    tracing::info!("netwatchd stopped");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    Ok(())
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}
