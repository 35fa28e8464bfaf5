//! Error types for the daemon.

use netwatch_protocol::ProtocolError;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the server and its connections.
///
/// `Config`, `Bind` and `WatchUnavailable` only occur during startup and are
/// fatal. `Transport`, `FrameDecode` and `Lagging` are local to one
/// connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Target path is missing or cannot be watched.
    #[error("cannot watch {}: {reason}", .path.display())]
    WatchUnavailable { path: PathBuf, reason: String },

    /// Read or write failure on a subscriber socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Subscriber sent data that could not be framed.
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] ProtocolError),

    /// Subscriber stopped draining events and overflowed its backlog.
    #[error("subscriber fell too far behind")]
    Lagging,
}

impl ServerError {
    pub fn watch_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WatchUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error is confined to a single connection.
    #[must_use]
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::FrameDecode(_) | Self::Lagging
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_not_connection_local() {
        assert!(!ServerError::Config("missing path".into()).is_connection_local());
        assert!(!ServerError::watch_unavailable("/nope", "not found").is_connection_local());
    }

    #[test]
    fn test_transport_error_is_connection_local() {
        let err: ServerError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(err.is_connection_local());
        assert!(ServerError::Lagging.is_connection_local());
    }

    #[test]
    fn test_watch_unavailable_message() {
        let err = ServerError::watch_unavailable("/tmp/missing.txt", "No such file");
        assert_eq!(err.to_string(), "cannot watch /tmp/missing.txt: No such file");
    }
}
