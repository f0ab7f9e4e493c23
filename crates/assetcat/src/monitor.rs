//! Content-based change detection for watched files.
//!
//! The monitor watches the *directory* containing each file rather than the
//! file itself. Mounted config volumes replace files by swapping a symlink in
//! the parent directory, which a watch on the old target never sees. Every
//! create or write event in a watched directory re-hashes the files tracked
//! there, and subscribers are notified only when a file's content hash
//! actually changed.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default number of undelivered notifications kept per subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// SHA-256 of a file's content.
pub type ContentHash = [u8; 32];

/// Hash recorded for a file that is missing or unreadable.
const MISSING: ContentHash = [0u8; 32];

/// Errors returned by [`ChangeMonitor`].
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to create file watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("Failed to start watch thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to resolve path '{path}': {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path '{0}' does not name a file")]
    InvalidPath(PathBuf),

    #[error("Failed to watch directory '{path}': {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Change monitor is closed")]
    Closed,
}

struct Subscriber {
    tx: mpsc::Sender<()>,
    dropped: Arc<AtomicU64>,
}

/// Per-file state shared by every subscriber of the same path.
struct MonitorRecord {
    hash: ContentHash,
    subscribers: Vec<Subscriber>,
}

impl MonitorRecord {
    fn new(hash: ContentHash) -> Self {
        Self {
            hash,
            subscribers: Vec::new(),
        }
    }

    /// Stores `hash` and notifies subscribers if it differs from the last one.
    ///
    /// Never blocks: a subscriber whose queue is full misses this
    /// notification and its drop counter is bumped. Subscribers whose
    /// receiver is gone are pruned.
    fn update(&mut self, hash: ContentHash, path: &Path, total_dropped: &AtomicU64) -> bool {
        if self.hash == hash {
            return false;
        }
        self.hash = hash;

        self.subscribers.retain(|sub| match sub.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                let dropped = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                total_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Dropped change notification for {} (subscriber queue full, {} dropped so far)",
                    path.display(),
                    dropped
                );
                true
            }
            Err(TrySendError::Closed(())) => false,
        });
        true
    }
}

/// Directory to tracked file name to record.
type Registry = HashMap<PathBuf, HashMap<OsString, MonitorRecord>>;

struct MonitorInner {
    registry: RwLock<Registry>,
    dropped: AtomicU64,
}

impl MonitorInner {
    /// Re-hashes tracked files in `dirs`, or in every watched directory when
    /// none of `dirs` is watched.
    fn rescan(&self, dirs: &HashSet<PathBuf>) {
        let targets: Vec<(PathBuf, OsString)> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let matched = dirs.iter().any(|d| registry.contains_key(d));
            registry
                .iter()
                .filter(|(dir, _)| !matched || dirs.contains(*dir))
                .flat_map(|(dir, files)| files.keys().map(move |name| (dir.clone(), name.clone())))
                .collect()
        };

        // Hash without holding the lock; reads may be slow.
        let hashed: Vec<(PathBuf, OsString, ContentHash)> = targets
            .into_iter()
            .map(|(dir, name)| {
                let hash = hash_file(&dir.join(&name));
                (dir, name, hash)
            })
            .collect();

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for (dir, name, hash) in hashed {
            if let Some(record) = registry.get_mut(&dir).and_then(|files| files.get_mut(&name)) {
                let path = dir.join(&name);
                if record.update(hash, &path, &self.dropped) {
                    log::debug!("Content of {} changed", path.display());
                }
            }
        }
    }
}

/// Watches files for content changes and fans notifications out to
/// subscribers.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
/// [`ChangeMonitor::close`] stops the watch thread and ends every
/// subscription; it also runs on drop.
pub struct ChangeMonitor {
    inner: Arc<MonitorInner>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    queue_capacity: usize,
}

impl ChangeMonitor {
    /// Creates a monitor with the default per-subscriber queue capacity.
    pub fn new() -> Result<Self, WatchError> {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a monitor whose subscribers each buffer up to `queue_capacity`
    /// notifications.
    pub fn with_capacity(queue_capacity: usize) -> Result<Self, WatchError> {
        let (tx, rx) = std_mpsc::channel::<notify::Result<Event>>();
        let watcher = notify::recommended_watcher(tx).map_err(WatchError::Create)?;

        let inner = Arc::new(MonitorInner {
            registry: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let inner = Arc::clone(&inner);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("change-monitor".to_string())
                .spawn(move || watch_loop(&inner, &shutdown, rx))
                .map_err(WatchError::Spawn)?
        };

        Ok(Self {
            inner,
            watcher: Mutex::new(Some(watcher)),
            thread: Mutex::new(Some(thread)),
            shutdown,
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Subscribes to content changes of `path`.
    ///
    /// The path is made absolute but symlinks are not resolved, so a swap of
    /// the link target is seen as a change of this path. Subscriptions to the
    /// same path share one hash record; each gets its own queue. The file
    /// does not need to exist yet, but its directory does.
    pub fn subscribe(&self, path: impl AsRef<Path>) -> Result<Subscription, WatchError> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).map_err(|e| WatchError::Resolve {
            path: path.to_path_buf(),
            source: e,
        })?;
        let (dir, name) = match (absolute.parent(), absolute.file_name()) {
            (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_os_string()),
            _ => return Err(WatchError::InvalidPath(absolute)),
        };

        let initial = hash_file(&absolute);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut registry = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(WatchError::Closed);
        }

        if !registry.contains_key(&dir) {
            let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
            let watcher = watcher.as_mut().ok_or(WatchError::Closed)?;
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| WatchError::Watch {
                    path: dir.clone(),
                    source: e,
                })?;
            log::info!("Started watching directory: {}", dir.display());
            registry.insert(dir.clone(), HashMap::new());
        }

        let files = registry.entry(dir).or_default();
        files
            .entry(name)
            .or_insert_with(|| MonitorRecord::new(initial))
            .subscribers
            .push(Subscriber {
                tx,
                dropped: Arc::clone(&dropped),
            });

        Ok(Subscription {
            path: absolute,
            rx,
            dropped,
        })
    }

    /// Total notifications dropped across all subscribers.
    pub fn dropped_notifications(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Returns whether [`ChangeMonitor::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stops watching and ends every subscription. Idempotent.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the watcher disconnects the event channel.
        drop(
            self.watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if let Some(handle) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = handle.join();
        }

        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        log::info!("Stopped change monitor");
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

fn watch_loop(
    inner: &MonitorInner,
    shutdown: &AtomicBool,
    rx: std_mpsc::Receiver<notify::Result<Event>>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(event)) => {
                if !is_content_event(&event.kind) {
                    continue;
                }
                let dirs: HashSet<PathBuf> = event
                    .paths
                    .iter()
                    .filter_map(|p| p.parent().map(Path::to_path_buf))
                    .collect();
                inner.rescan(&dirs);
            }
            Ok(Err(e)) => {
                log::error!("Watch error: {}", e);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Creates and writes count as content events. A rename *into* the directory
/// counts too: that is how an atomic symlink swap lands.
fn is_content_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => true,
        EventKind::Modify(ModifyKind::Name(
            RenameMode::To | RenameMode::Both | RenameMode::Any,
        )) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    }
}

/// Streams the file through SHA-256. Missing or unreadable files hash to a
/// fixed sentinel.
fn hash_file(path: &Path) -> ContentHash {
    let Ok(mut file) = File::open(path) else {
        return MISSING;
    };
    let mut hasher = Sha256::new();
    match io::copy(&mut file, &mut hasher) {
        Ok(_) => hasher.finalize().into(),
        Err(e) => {
            log::warn!("Failed to read {}: {}", path.display(), e);
            MISSING
        }
    }
}

/// A stream of change notifications for one path.
pub struct Subscription {
    path: PathBuf,
    rx: mpsc::Receiver<()>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Waits for the next change. Returns `false` once the monitor is closed.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// The absolute path this subscription watches.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Notifications this subscriber missed because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const EVENT_WAIT: Duration = Duration::from_secs(5);
    const QUIET_WAIT: Duration = Duration::from_millis(400);

    /// Replaces `path` atomically so no reader sees a half-written file.
    fn write_atomic(path: &Path, content: &str) {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content).unwrap();
        fs::rename(&tmp, path).unwrap();
    }

    async fn expect_change(sub: &mut Subscription) {
        let changed = timeout(EVENT_WAIT, sub.changed())
            .await
            .expect("expected a change notification");
        assert!(changed);
    }

    async fn expect_quiet(sub: &mut Subscription) {
        assert!(
            timeout(QUIET_WAIT, sub.changed()).await.is_err(),
            "Unexpected change notification"
        );
    }

    #[test]
    fn test_hash_file_missing_is_sentinel() {
        let dir = TempDir::new().unwrap();
        assert_eq!(hash_file(&dir.path().join("missing")), MISSING);

        let path = dir.path().join("a.yaml");
        fs::write(&path, "a").unwrap();
        let first = hash_file(&path);
        assert_ne!(first, MISSING);
        fs::write(&path, "a").unwrap();
        assert_eq!(hash_file(&path), first);
        fs::write(&path, "b").unwrap();
        assert_ne!(hash_file(&path), first);
    }

    #[test]
    fn test_content_event_kinds() {
        use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

        assert!(is_content_event(&EventKind::Create(CreateKind::File)));
        assert!(is_content_event(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(is_content_event(&EventKind::Modify(ModifyKind::Name(
            RenameMode::To
        ))));
        assert!(!is_content_event(&EventKind::Modify(ModifyKind::Name(
            RenameMode::From
        ))));
        assert!(!is_content_event(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!is_content_event(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn test_full_queue_counts_dropped() {
        let total = AtomicU64::new(0);
        let (tx, mut rx) = mpsc::channel(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut record = MonitorRecord::new(MISSING);
        record.subscribers.push(Subscriber {
            tx,
            dropped: Arc::clone(&dropped),
        });

        let path = Path::new("/x.yaml");
        assert!(record.update([1; 32], path, &total));
        assert!(record.update([2; 32], path, &total));
        assert!(record.update([3; 32], path, &total));
        assert!(!record.update([3; 32], path, &total));

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert_eq!(total.load(Ordering::Relaxed), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(record.subscribers.len(), 1);
    }

    #[test]
    fn test_closed_subscriber_pruned() {
        let total = AtomicU64::new(0);
        let (tx, rx) = mpsc::channel(1);
        let mut record = MonitorRecord::new(MISSING);
        record.subscribers.push(Subscriber {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        });
        drop(rx);

        record.update([1; 32], Path::new("/x.yaml"), &total);
        assert!(record.subscribers.is_empty());
        assert_eq!(total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_identical_write_is_not_a_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(&path, "a: 1\n").unwrap();

        let monitor = ChangeMonitor::new().unwrap();
        let mut sub = monitor.subscribe(&path).unwrap();

        write_atomic(&path, "a: 1\n");
        expect_quiet(&mut sub).await;

        write_atomic(&path, "a: 2\n");
        expect_change(&mut sub).await;
        expect_quiet(&mut sub).await;
    }

    #[tokio::test]
    async fn test_each_subscriber_notified_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(&path, "v1").unwrap();

        let monitor = ChangeMonitor::new().unwrap();
        let mut first = monitor.subscribe(&path).unwrap();
        let mut second = monitor.subscribe(&path).unwrap();

        write_atomic(&path, "v2");
        expect_change(&mut first).await;
        expect_change(&mut second).await;
        expect_quiet(&mut first).await;
        expect_quiet(&mut second).await;
    }

    #[tokio::test]
    async fn test_unrelated_file_in_same_directory_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(&path, "v1").unwrap();

        let monitor = ChangeMonitor::new().unwrap();
        let mut sub = monitor.subscribe(&path).unwrap();

        write_atomic(&dir.path().join("other.yaml"), "x");
        expect_quiet(&mut sub).await;
    }

    #[tokio::test]
    async fn test_missing_file_appearing_is_a_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.yaml");

        let monitor = ChangeMonitor::new().unwrap();
        let mut sub = monitor.subscribe(&path).unwrap();

        write_atomic(&path, "hello");
        expect_change(&mut sub).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_swap_detected() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("v1")).unwrap();
        fs::write(root.join("v1/sources.yaml"), "version: 1").unwrap();
        symlink("v1", root.join("..data")).unwrap();
        symlink("..data/sources.yaml", root.join("sources.yaml")).unwrap();

        let monitor = ChangeMonitor::new().unwrap();
        let mut sub = monitor.subscribe(root.join("sources.yaml")).unwrap();

        fs::create_dir(root.join("v2")).unwrap();
        fs::write(root.join("v2/sources.yaml"), "version: 2").unwrap();
        symlink("v2", root.join("..data_tmp")).unwrap();
        fs::rename(root.join("..data_tmp"), root.join("..data")).unwrap();

        expect_change(&mut sub).await;
        assert_eq!(
            fs::read_to_string(root.join("sources.yaml")).unwrap(),
            "version: 2"
        );
    }

    #[test]
    fn test_subscribe_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let monitor = ChangeMonitor::new().unwrap();
        let err = monitor
            .subscribe(dir.path().join("nope/sources.yaml"))
            .unwrap_err();
        assert!(matches!(err, WatchError::Watch { .. }), "{}", err);
    }

    #[test]
    fn test_subscribe_root_is_invalid() {
        let monitor = ChangeMonitor::new().unwrap();
        assert!(matches!(
            monitor.subscribe("/"),
            Err(WatchError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_streams() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources.yaml");
        fs::write(&path, "v1").unwrap();

        let monitor = ChangeMonitor::new().unwrap();
        let mut sub = monitor.subscribe(&path).unwrap();
        assert_eq!(sub.path(), path.as_path());

        monitor.close();
        monitor.close();
        assert!(monitor.is_closed());

        let changed = timeout(EVENT_WAIT, sub.changed()).await.unwrap();
        assert!(!changed);
        assert!(matches!(monitor.subscribe(&path), Err(WatchError::Closed)));
    }
}
