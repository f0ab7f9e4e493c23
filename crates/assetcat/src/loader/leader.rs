//! Leadership acquisition.
//!
//! The loader does not elect itself; something outside it decides who may
//! write. [`run_leader_election`] polls a [`LeaderLock`] and drives
//! [`Loader::start_leader`] for as long as the lock is held.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{LoaderError, Result};
use super::Loader;

/// A lock that at most one replica holds at a time.
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Tries to take the lock. `Ok(false)` means someone else holds it;
    /// backend failures are reported as [`LoaderError::Lock`] and retried.
    async fn try_acquire(&self) -> Result<bool>;

    /// Whether the lock is still held. Polled during a leadership term.
    fn is_leader(&self) -> bool;

    /// Gives the lock up after a term ends.
    async fn release(&self) {}
}

/// Single-replica lock: always granted unless revoked.
#[derive(Debug, Default)]
pub struct StandaloneLock {
    held: AtomicBool,
    revoked: AtomicBool,
}

impl StandaloneLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops leadership and refuses to grant it again until [`Self::restore`].
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn restore(&self) {
        self.revoked.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderLock for StandaloneLock {
    async fn try_acquire(&self) -> Result<bool> {
        let granted = !self.revoked.load(Ordering::SeqCst);
        self.held.store(granted, Ordering::SeqCst);
        Ok(granted)
    }

    fn is_leader(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    async fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

/// Acquires leadership whenever possible and runs leader terms until
/// `shutdown` is cancelled.
///
/// A term ends when the lock reports it is no longer held, when the loader
/// relinquishes after a persistence failure, or on shutdown. After a term the
/// lock is released and acquisition resumes after `poll`.
pub async fn run_leader_election(
    loader: Loader,
    lock: Arc<dyn LeaderLock>,
    poll: Duration,
    shutdown: CancellationToken,
) {
    info!(poll_ms = poll.as_millis() as u64, "Started leader election");

    while !shutdown.is_cancelled() {
        match lock.try_acquire().await {
            Ok(true) => {
                let term = shutdown.child_token();
                let monitor = tokio::spawn(watch_lock(Arc::clone(&lock), term.clone(), poll));

                let outcome = loader.start_leader(term.clone()).await;
                term.cancel();
                let _ = monitor.await;
                lock.release().await;

                match outcome {
                    Ok(()) => info!("Leadership term ended"),
                    Err(LoaderError::ShuttingDown) => break,
                    Err(e) => error!(error = %e, "Leadership term failed"),
                }
            }
            Ok(false) => debug!("Leadership held elsewhere"),
            Err(e) => warn!(error = %e, "Leadership lock unavailable"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }
    }

    info!("Stopped leader election");
}

/// Cancels `term` once the lock is no longer held.
async fn watch_lock(lock: Arc<dyn LeaderLock>, term: CancellationToken, poll: Duration) {
    loop {
        tokio::select! {
            _ = term.cancelled() => return,
            _ = tokio::time::sleep(poll) => {
                if !lock.is_leader() {
                    info!("Leadership lost");
                    term.cancel();
                    return;
                }
            }
        }
    }
}
