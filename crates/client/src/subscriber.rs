//! Line-reassembling reader for the change stream.

use netwatch_protocol::{ChangeEvent, Frame, FrameDecoder, ProtocolError};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Error type for subscriber operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// IO error on the connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated data from the server.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server closed the stream before greeting.
    #[error("connection closed before greeting")]
    MissingGreeting,
}

/// Reads frames from a server stream
pub struct Subscriber<R> {
    reader: R,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    expect_greeting: bool,
    greeting: Option<String>,
    buf: [u8; 4096],
}

impl Subscriber<TcpStream> {
    /// Connect to a netwatch server.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}

impl<R: AsyncRead + Unpin> Subscriber<R> {
    /// Wrap a stream whose first line is a greeting.
    pub fn new(reader: R) -> Self {
        Self::with_greeting(reader, true)
    }

    /// Wrap a stream that carries event lines only.
    pub fn events_only(reader: R) -> Self {
        Self::with_greeting(reader, false)
    }

    fn with_greeting(reader: R, expect_greeting: bool) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            expect_greeting,
            greeting: None,
            buf: [0u8; 4096],
        }
    }

    /// The greeting line, read from the stream on first call.
    ///
    /// Empty for streams created with [`Subscriber::events_only`].
    pub async fn greeting(&mut self) -> Result<&str, ClientError> {
        if self.expect_greeting && self.greeting.is_none() {
            let frame = self
                .next_frame()
                .await?
                .ok_or(ClientError::MissingGreeting)?;
            self.greeting = Some(frame.to_text()?.to_owned());
        }
        Ok(self.greeting.as_deref().unwrap_or_default())
    }

    /// Next change event, or `None` once the server closes the stream cleanly.
    pub async fn next_event(&mut self) -> Result<Option<ChangeEvent>, ClientError> {
        self.greeting().await?;
        match self.next_frame().await? {
            Some(frame) => Ok(Some(frame.to_event()?)),
            None => Ok(None),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                std::mem::take(&mut self.decoder).finish()?;
                return Ok(None);
            }
            self.pending.extend(self.decoder.decode(&self.buf[..n])?);
        }
    }
}
