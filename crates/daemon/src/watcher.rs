//! Single-file watcher with subscriber fan-out.
//!
//! One underlying `notify` watcher observes the target. Every connection
//! subscribes to it and gets its own bounded channel. Delivery never blocks:
//! a subscriber whose backlog is full is cut off and its receiver drains to
//! `None`, so a slow subscriber never holds up the notify thread or the
//! other subscribers.

use crate::config::{WatchBackend, WatchConfig};
use crate::error::ServerError;
use netwatch_protocol::ChangeEvent;
use notify::{EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Identifier of one subscription to the source
pub type SubscriptionId = u64;

/// The file under observation. Resolved once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    path: PathBuf,
}

impl WatchTarget {
    /// Resolve `path` to an absolute, canonical path.
    ///
    /// Fails with `WatchUnavailable` if the path does not exist.
    pub fn resolve(path: &Path) -> Result<Self, ServerError> {
        let path = std::fs::canonicalize(path)
            .map_err(|e| ServerError::watch_unavailable(path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether a notify event counts as a change of the target
fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Any => true,
        EventKind::Access(_) | EventKind::Other => false,
    }
}

/// Events a subscriber may have queued before it is cut off
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 1024;

struct Registration {
    tx: mpsc::Sender<ChangeEvent>,
    overflowed: Arc<AtomicBool>,
}

/// Registered subscribers, shared with the notify callback
struct Subscribers {
    senders: Mutex<HashMap<SubscriptionId, Registration>>,
    backlog: usize,
    next_id: AtomicU64,
    released: AtomicU64,
}

impl Subscribers {
    fn new(backlog: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            backlog: backlog.max(1),
            next_id: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    fn insert(&self) -> (SubscriptionId, Arc<AtomicBool>, mpsc::Receiver<ChangeEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.backlog);
        let overflowed = Arc::new(AtomicBool::new(false));
        self.senders.lock().insert(
            id,
            Registration {
                tx,
                overflowed: Arc::clone(&overflowed),
            },
        );
        (id, overflowed, rx)
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        self.senders.lock().remove(&id).is_some()
    }

    /// Send to every subscriber without blocking.
    ///
    /// Subscribers whose receiver is gone are dropped, as are those whose
    /// backlog is full; the latter are flagged as overflowed. Holding the lock
    /// for the whole pass keeps per-subscriber order equal to publish order.
    fn broadcast(&self, event: ChangeEvent) -> usize {
        let backlog = self.backlog;
        let mut senders = self.senders.lock();
        senders.retain(|&id, reg| match reg.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                reg.overflowed.store(true, Ordering::Release);
                tracing::warn!(
                    subscription_id = id,
                    backlog,
                    "Subscriber backlog full, cutting off"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        senders.len()
    }

    fn clear(&self) {
        self.senders.lock().clear();
    }

    fn len(&self) -> usize {
        self.senders.lock().len()
    }
}

/// The OS-level watcher; dropping it stops watching.
enum Backend {
    Native(RecommendedWatcher),
    Poll(PollWatcher),
    Debounced(Debouncer<RecommendedWatcher, RecommendedCache>),
}

impl Backend {
    fn start(
        target: &WatchTarget,
        config: &WatchConfig,
        subscribers: Arc<Subscribers>,
    ) -> notify::Result<Self> {
        let path = target.path().to_path_buf();

        if config.backend == WatchBackend::Native && config.debounce_ms > 0 {
            let mut debouncer = new_debouncer(
                Duration::from_millis(config.debounce_ms),
                None,
                move |res: DebounceEventResult| match res {
                    Ok(events) => {
                        if events.iter().any(|e| is_change(&e.kind)) {
                            dispatch(&subscribers, &path);
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            tracing::error!(error = %e, "Watch error");
                        }
                    }
                },
            )?;
            debouncer.watch(target.path(), RecursiveMode::NonRecursive)?;
            return Ok(Self::Debounced(debouncer));
        }

        let handler = move |res: notify::Result<notify::Event>| match res {
            Ok(event) if is_change(&event.kind) => dispatch(&subscribers, &path),
            Ok(event) => {
                tracing::trace!(kind = ?event.kind, "Ignoring event");
            }
            Err(e) => {
                tracing::error!(error = %e, "Watch error");
            }
        };

        match config.backend {
            WatchBackend::Native => {
                let mut watcher = RecommendedWatcher::new(handler, notify::Config::default())?;
                watcher.watch(target.path(), RecursiveMode::NonRecursive)?;
                Ok(Self::Native(watcher))
            }
            WatchBackend::Poll => {
                let poll_config = notify::Config::default()
                    .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
                    .with_compare_contents(false); // Use mtime, not content hashing
                let mut watcher = PollWatcher::new(handler, poll_config)?;
                watcher.watch(target.path(), RecursiveMode::NonRecursive)?;
                Ok(Self::Poll(watcher))
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Poll(_) => "poll",
            Self::Debounced(_) => "debounced",
        }
    }
}

fn dispatch(subscribers: &Subscribers, path: &Path) {
    let delivered = subscribers.broadcast(ChangeEvent::now());
    tracing::debug!(path = %path.display(), subscribers = delivered, "Change dispatched");
}

/// Shared watch over one target, fanning each change out to all subscribers
pub struct FileWatchSource {
    target: WatchTarget,
    subscribers: Arc<Subscribers>,
    backend: Mutex<Option<Backend>>,
}

impl FileWatchSource {
    /// Start watching `target`.
    ///
    /// Fails with `WatchUnavailable` if the OS watcher cannot be created or
    /// the path cannot be watched.
    pub fn open(target: WatchTarget, config: &WatchConfig) -> Result<Self, ServerError> {
        let subscribers = Arc::new(Subscribers::new(config.subscriber_backlog));
        let backend = Backend::start(&target, config, Arc::clone(&subscribers))
            .map_err(|e| ServerError::watch_unavailable(target.path(), e))?;

        tracing::info!(
            path = %target.path().display(),
            backend = backend.kind(),
            "Watching file"
        );

        Ok(Self {
            target,
            subscribers,
            backend: Mutex::new(Some(backend)),
        })
    }

    /// A source with no OS watcher behind it; changes only come from `publish`.
    #[cfg(test)]
    pub(crate) fn detached(target: WatchTarget) -> Self {
        Self {
            target,
            subscribers: Arc::new(Subscribers::new(DEFAULT_SUBSCRIBER_BACKLOG)),
            backend: Mutex::new(None),
        }
    }

    /// Like [`FileWatchSource::detached`] with a custom per-subscriber backlog.
    #[cfg(test)]
    pub(crate) fn detached_with_backlog(target: WatchTarget, backlog: usize) -> Self {
        Self {
            target,
            subscribers: Arc::new(Subscribers::new(backlog)),
            backend: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Register a listener.
    ///
    /// Events arrive on the returned receiver in the order changes fired.
    /// The receiver yields `None` once the source closes or the subscriber
    /// overflows its backlog. The handle releases the registration when
    /// closed or dropped.
    pub fn subscribe(&self) -> (WatchHandle, mpsc::Receiver<ChangeEvent>) {
        let (id, overflowed, rx) = self.subscribers.insert();
        let handle = WatchHandle {
            id,
            subscribers: Arc::clone(&self.subscribers),
            overflowed,
            released: AtomicBool::new(false),
        };
        (handle, rx)
    }

    /// Deliver one event to every subscriber. Returns how many received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.subscribers.broadcast(event)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total number of subscriptions released so far
    pub fn release_count(&self) -> u64 {
        self.subscribers.released.load(Ordering::Relaxed)
    }

    /// Stop the OS watcher and disconnect every subscriber channel.
    ///
    /// Idempotent: returns true only for the call that stopped the watcher.
    pub fn close(&self) -> bool {
        let backend = self.backend.lock().take();
        self.subscribers.clear();
        match backend {
            Some(backend) => {
                drop(backend);
                tracing::info!(path = %self.target.path().display(), "Stopped watching file");
                true
            }
            None => false,
        }
    }
}

impl Drop for FileWatchSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// One active subscription to a [`FileWatchSource`]
pub struct WatchHandle {
    id: SubscriptionId,
    subscribers: Arc<Subscribers>,
    overflowed: Arc<AtomicBool>,
    released: AtomicBool,
}

impl WatchHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Whether the subscription was cut off for falling too far behind
    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    /// Release the subscription.
    ///
    /// Safe to call any number of times from any thread; only the first call
    /// releases and returns true. The release is counted even if the sender
    /// was already pruned.
    pub fn close(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.subscribers.remove(self.id);
        self.subscribers.released.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("overflowed", &self.is_overflowed())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
    use std::io::Write;

    fn temp_target() -> (tempfile::NamedTempFile, WatchTarget) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let target = WatchTarget::resolve(file.path()).unwrap();
        (file, target)
    }

    #[test]
    fn test_is_change() {
        assert!(is_change(&EventKind::Modify(ModifyKind::Data(DataChange::Any))));
        assert!(is_change(&EventKind::Create(CreateKind::File)));
        assert!(is_change(&EventKind::Remove(RemoveKind::File)));
        assert!(is_change(&EventKind::Any));
        assert!(!is_change(&EventKind::Access(AccessKind::Any)));
        assert!(!is_change(&EventKind::Other));
    }

    #[test]
    fn test_resolve_missing_path() {
        let err =
            WatchTarget::resolve(Path::new("/nonexistent/netwatch/target.txt")).unwrap_err();
        assert!(matches!(err, ServerError::WatchUnavailable { .. }));
    }

    #[test]
    fn test_resolve_is_absolute() {
        let (_file, target) = temp_target();
        assert!(target.path().is_absolute());
    }

    #[test]
    fn test_fan_out_to_every_subscriber() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);

        let mut subs: Vec<_> = (0..3).map(|_| source.subscribe()).collect();
        assert_eq!(source.publish(ChangeEvent::changed(1)), 3);

        for (_, rx) in &mut subs {
            assert_eq!(rx.try_recv().unwrap(), ChangeEvent::changed(1));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_per_subscriber_fifo() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);
        let (_handle, mut rx) = source.subscribe();

        for ts in 1..=5 {
            source.publish(ChangeEvent::changed(ts));
        }
        let got: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_handle_close_is_idempotent() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);
        let (handle, _rx) = source.subscribe();
        let (_other, mut other_rx) = source.subscribe();

        assert!(handle.close());
        assert!(!handle.close());
        drop(handle);

        assert_eq!(source.release_count(), 1);
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(source.publish(ChangeEvent::changed(9)), 1);
        assert_eq!(other_rx.try_recv().unwrap().timestamp, 9);
    }

    #[test]
    fn test_concurrent_close_releases_once() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);
        let (handle, _rx) = source.subscribe();
        let handle = Arc::new(handle);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                std::thread::spawn(move || handle.close())
            })
            .collect();
        let wins = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&released| released)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(source.release_count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);
        let (_handle, rx) = source.subscribe();
        drop(rx);

        assert_eq!(source.publish(ChangeEvent::changed(1)), 0);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_release_counted_after_prune() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);
        let (handle, rx) = source.subscribe();
        drop(rx);

        assert_eq!(source.publish(ChangeEvent::changed(1)), 0);
        assert!(handle.close());
        assert!(!handle.close());
        assert_eq!(source.release_count(), 1);
    }

    #[test]
    fn test_release_counted_after_source_close() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached(target);
        let (handle, _rx) = source.subscribe();

        source.close();
        assert_eq!(source.subscriber_count(), 0);
        drop(handle);
        assert_eq!(source.release_count(), 1);
    }

    #[test]
    fn test_full_backlog_cuts_off_subscriber() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::detached_with_backlog(target, 2);
        let (slow, mut slow_rx) = source.subscribe();
        let (fast, mut fast_rx) = source.subscribe();

        assert_eq!(source.publish(ChangeEvent::changed(1)), 2);
        assert_eq!(fast_rx.try_recv().unwrap().timestamp, 1);
        assert_eq!(source.publish(ChangeEvent::changed(2)), 2);
        assert_eq!(fast_rx.try_recv().unwrap().timestamp, 2);
        assert_eq!(source.publish(ChangeEvent::changed(3)), 1);

        assert!(slow.is_overflowed());
        assert!(!fast.is_overflowed());
        assert_eq!(fast_rx.try_recv().unwrap().timestamp, 3);

        // Queued events still drain, then the channel reports closed.
        assert_eq!(slow_rx.try_recv().unwrap().timestamp, 1);
        assert_eq!(slow_rx.try_recv().unwrap().timestamp, 2);
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_source_close_is_idempotent() {
        let (_file, target) = temp_target();
        let source = FileWatchSource::open(target, &WatchConfig::default()).unwrap();
        let (_handle, mut rx) = source.subscribe();

        assert!(source.close());
        assert!(!source.close());
        assert_eq!(source.subscriber_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_native_watch_reports_write() {
        let (mut file, target) = temp_target();
        let source = FileWatchSource::open(target, &WatchConfig::default()).unwrap();
        let (_handle, mut rx) = source.subscribe();

        writeln!(file, "hello").unwrap();
        file.as_file().sync_all().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change event within 5s")
            .unwrap();
        assert_eq!(event.kind, netwatch_protocol::EventKind::Changed);
    }

    #[tokio::test]
    async fn test_poll_watch_reports_write() {
        let (file, target) = temp_target();
        let config = WatchConfig {
            backend: WatchBackend::Poll,
            poll_interval_ms: 50,
            ..WatchConfig::default()
        };
        let source = FileWatchSource::open(target, &config).unwrap();
        let (_handle, mut rx) = source.subscribe();

        // mtime granularity can be coarse; make sure it moves.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(file.path(), b"changed contents").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change event within 5s");
        assert!(event.is_some());
    }
}
