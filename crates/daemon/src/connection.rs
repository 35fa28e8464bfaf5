//! One subscriber connection.
//!
//! Lifecycle: `Connecting -> Active -> Closing -> Closed`. The connection
//! greets the peer, subscribes to the watch source and then writes one frame
//! per change event until either side goes away. Teardown runs exactly once
//! no matter how many close triggers race.

use crate::error::ServerError;
use crate::state::ServerState;
use crate::watcher::WatchHandle;
use netwatch_protocol::{FrameDecoder, encode, greeting};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

/// Unique connection identifier
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a connection ended
#[derive(Debug)]
pub enum CloseReason {
    /// Peer closed its side of the stream
    PeerClosed,
    /// Server is shutting down
    Shutdown,
    /// Watch source stopped delivering events
    SourceClosed,
    /// Connection task was cancelled
    Aborted,
    /// Transport or framing failure
    Failed(ServerError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::SourceClosed => f.write_str("watch source closed"),
            Self::Aborted => f.write_str("aborted"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// A subscriber connected to the server
pub struct SubscriberConnection {
    id: ConnectionId,
    peer: SocketAddr,
    state: Mutex<ConnectionState>,
    /// Set while `Active`; taken exactly once on close
    watch: Mutex<Option<WatchHandle>>,
    server: Arc<ServerState>,
    connected_at: Instant,
}

impl SubscriberConnection {
    pub fn new(id: ConnectionId, peer: SocketAddr, server: Arc<ServerState>) -> Self {
        Self {
            id,
            peer,
            state: Mutex::new(ConnectionState::Connecting),
            watch: Mutex::new(None),
            server,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether events may still be written
    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Active
        )
    }

    /// Drive the connection until it closes.
    ///
    /// The connection is closed when this returns, and also if the future is
    /// dropped before completion.
    pub async fn run<S>(
        self: Arc<Self>,
        stream: S,
        mut shutdown: broadcast::Receiver<()>,
        max_frame_len: usize,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let guard = CloseGuard(Arc::clone(&self));

        let reason = match self.serve(stream, &mut shutdown, max_frame_len).await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Failed(e),
        };
        self.close(&reason);

        drop(guard);
    }

    async fn serve<S>(
        &self,
        stream: S,
        shutdown: &mut broadcast::Receiver<()>,
        max_frame_len: usize,
    ) -> Result<CloseReason, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        writer
            .write_all(greeting(self.server.target().path()).as_bytes())
            .await?;

        let (handle, mut events) = self.server.source().subscribe();
        if !self.activate(handle) {
            return Ok(CloseReason::Shutdown);
        }

        let mut decoder = FrameDecoder::with_max_frame_len(max_frame_len);
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    return Ok(CloseReason::Shutdown);
                }
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(CloseReason::PeerClosed);
                    }
                    // Subscribers have nothing to say; lines are framed only
                    // to bound what we buffer.
                    for frame in decoder.decode(&buf[..n])? {
                        tracing::trace!(
                            connection_id = self.id,
                            len = frame.as_bytes().len(),
                            "Ignoring inbound line"
                        );
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return if self.is_overflowed() {
                            Err(ServerError::Lagging)
                        } else {
                            Ok(CloseReason::SourceClosed)
                        };
                    };
                    if !self.is_open() {
                        return Ok(CloseReason::Shutdown);
                    }
                    writer.write_all(&encode(&event)?).await?;
                    tracing::trace!(
                        connection_id = self.id,
                        timestamp = event.timestamp,
                        "Event sent"
                    );
                }
            }
        }
    }

    fn is_overflowed(&self) -> bool {
        self.watch
            .lock()
            .as_ref()
            .is_some_and(WatchHandle::is_overflowed)
    }

    /// Move to `Active` and take ownership of the watch handle.
    ///
    /// Returns false if the connection was closed meanwhile; the handle is
    /// then released on drop.
    fn activate(&self, handle: WatchHandle) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Connecting {
            return false;
        }
        *self.watch.lock() = Some(handle);
        *state = ConnectionState::Active;
        true
    }

    /// Close the connection: release the watch, leave the live set.
    ///
    /// Only the first call does anything and returns true.
    pub fn close(&self, reason: &CloseReason) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
                return false;
            }
            *state = ConnectionState::Closing;
        }

        if let Some(handle) = self.watch.lock().take() {
            handle.close();
        }
        self.server.unregister(self.id);
        *self.state.lock() = ConnectionState::Closed;

        let connected_secs = self.connected_at.elapsed().as_secs();
        match reason {
            CloseReason::Failed(e) if e.is_connection_local() => tracing::warn!(
                connection_id = self.id,
                peer = %self.peer,
                connected_secs,
                error = %e,
                "Subscriber disconnected"
            ),
            CloseReason::Failed(e) => tracing::error!(
                connection_id = self.id,
                peer = %self.peer,
                connected_secs,
                error = %e,
                "Subscriber disconnected"
            ),
            _ => tracing::info!(
                connection_id = self.id,
                peer = %self.peer,
                connected_secs,
                reason = %reason,
                "Subscriber disconnected"
            ),
        }
        true
    }
}

/// Closes the connection if its task is dropped early
struct CloseGuard(Arc<SubscriberConnection>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.close(&CloseReason::Aborted);
    }
}
