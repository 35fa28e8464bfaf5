//! A server that sends one event split into two delayed chunks.
//!
//! Subscribers that treat every read as a whole message fail against it;
//! subscribers that buffer until the newline succeed.

use netwatch_protocol::{ChangeEvent, encode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Offset of the split, inside the `"timestamp"` key.
pub const DEFAULT_SPLIT_AT: usize = 29;

/// Pause between the two chunks.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Timestamp carried by the demo event.
pub const DEMO_TIMESTAMP: u64 = 1_525_549_135;

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub event: ChangeEvent,
    /// Byte offset where the encoded frame is cut; clamped to its length
    pub split_at: usize,
    pub delay: Duration,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            event: ChangeEvent::changed(DEMO_TIMESTAMP),
            split_at: DEFAULT_SPLIT_AT,
            delay: DEFAULT_DELAY,
        }
    }
}

/// Serve every connection with the split message until `shutdown` completes.
pub async fn serve_split_message<F>(
    listener: TcpListener,
    options: SplitOptions,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let frame: Arc<[u8]> = encode(&options.event).map_err(std::io::Error::other)?.into();
    let split_at = options.split_at.min(frame.len());

    tracing::info!(addr = %listener.local_addr()?, "Test server looking for subscribers...");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        tracing::info!(peer = %peer, "Subscriber connected");
                        let frame = Arc::clone(&frame);
                        let delay = options.delay;
                        tokio::spawn(async move {
                            match send_split(stream, &frame, split_at, delay).await {
                                Ok(()) => {
                                    tracing::info!(peer = %peer, "Subscriber disconnected");
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        error = %e,
                                        "Subscriber disconnected"
                                    );
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept error");
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}

async fn send_split(
    mut stream: TcpStream,
    frame: &[u8],
    split_at: usize,
    delay: Duration,
) -> std::io::Result<()> {
    let (first, second) = frame.split_at(split_at);
    stream.write_all(first).await?;

    // A subscriber that hangs up early cancels the second chunk.
    let mut probe = [0u8; 1];
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        read = stream.read(&mut probe) => {
            if matches!(read, Ok(0) | Err(_)) {
                tracing::debug!("Subscriber left before second chunk");
                return Ok(());
            }
            tokio::time::sleep(delay).await;
        }
    }

    stream.write_all(second).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Subscriber;
    use netwatch_protocol::FrameDecoder;
    use tokio::sync::oneshot;

    async fn start(options: SplitOptions) -> (std::net::SocketAddr, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(serve_split_message(listener, options, async {
            let _ = stop_rx.await;
        }));
        (addr, stop)
    }

    #[tokio::test]
    async fn test_first_read_is_partial() {
        let (addr, _stop) = start(SplitOptions::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, DEFAULT_SPLIT_AT);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&buf[..n]).unwrap().is_empty());
        // Parsing the first read as a message is exactly the bug.
        assert!(serde_json::from_slice::<ChangeEvent>(&buf[..n]).is_err());
    }

    #[tokio::test]
    async fn test_subscriber_reassembles_split_message() {
        let (addr, stop) = start(SplitOptions::default()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut sub = Subscriber::events_only(stream);

        let event = tokio::time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, Some(ChangeEvent::changed(DEMO_TIMESTAMP)));
        assert_eq!(sub.next_event().await.unwrap(), None);

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_split_point_is_clamped() {
        let (addr, _stop) = start(SplitOptions {
            split_at: 10_000,
            delay: Duration::from_millis(1),
            ..SplitOptions::default()
        })
        .await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut sub = Subscriber::events_only(stream);
        assert_eq!(
            sub.next_event().await.unwrap(),
            Some(ChangeEvent::changed(DEMO_TIMESTAMP))
        );
    }
}
