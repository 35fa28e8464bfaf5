//! TCP server for subscriber connections.
//!
//! Accepts subscribers and runs each one as an independent task. Handles
//! shutdown with a bounded grace period.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::state::ServerState;
use netwatch_protocol::DEFAULT_MAX_FRAME_LEN;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Tunables for a running server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// How long shutdown waits before aborting connection tasks
    pub shutdown_grace: Duration,
    /// Largest inbound line accepted from a subscriber
    pub max_frame_len: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            shutdown_grace: config.shutdown_grace(),
            max_frame_len: config.max_frame_len,
        }
    }
}

/// Broadcast server for change subscribers
pub struct BroadcastServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    /// Shared server state
    state: Arc<ServerState>,
    options: ServerOptions,
    /// Fans the shutdown signal out to connection tasks
    shutdown_tx: broadcast::Sender<()>,
}

impl BroadcastServer {
    /// Bind the listening socket.
    ///
    /// Fails with `Bind` if the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        state: Arc<ServerState>,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        tracing::info!(
            addr = %local_addr,
            path = %state.target().path().display(),
            "Listening for subscribers"
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            local_addr,
            state,
            options,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Accept subscribers until `shutdown` completes, then shut down.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let connection = self.state.connect(peer);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tasks.spawn(connection.run(
                                stream,
                                shutdown_rx,
                                self.options.max_frame_len,
                            ));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Accept error");
                        }
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Connection task failed");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.shutdown(tasks).await;
    }

    /// Stop accepting, close every live connection, then stop watching.
    ///
    /// Connections get `shutdown_grace` to finish; tasks still running after
    /// that are aborted, which closes their sockets.
    async fn shutdown(self, mut tasks: JoinSet<()>) {
        let Self {
            listener,
            state,
            options,
            shutdown_tx,
            ..
        } = self;
        drop(listener);

        let _ = shutdown_tx.send(());

        let drained = tokio::time::timeout(options.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                grace_ms = u64::try_from(options.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                "Grace period elapsed, closing remaining subscribers"
            );
            tasks.shutdown().await;
        }

        state.source().close();

        let stats = state.stats();
        tracing::info!(
            uptime_secs = stats.uptime_secs,
            live_connections = stats.live_connections,
            released_watches = stats.released_watches,
            "Server stopped"
        );
    }
}
