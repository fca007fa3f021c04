//! Per-connection operation lock
//!
//! Write operations against one logical connection are strictly serialized:
//! a single driver session is not assumed safe for concurrent statements.
//! Read and monitoring traffic bypasses the lock entirely, so a slow write
//! never starves status polls or analytics snapshots.
//!
//! Every lock records when it was taken. A lock held longer than the
//! configured maximum age is treated as abandoned (its holder crashed or
//! forgot to release) and is force-released before the next acquisition is
//! evaluated.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let _guard = lock.acquire_scoped("c1", Duration::from_secs(5), false).await?;
//! connector.execute_query("UPDATE users SET active = 1 WHERE id = 7", &[]).await?;
//! // released when `_guard` goes out of scope
//! ```

use crate::error::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy)]
struct Holder {
    since: Instant,
    generation: u64,
}

/// Lock state of one logical connection
struct LockEntry {
    /// Exactly one permit; available while the lock is free
    permit: Semaphore,
    holder: Mutex<Option<Holder>>,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            holder: Mutex::new(None),
        }
    }

    fn holder(&self) -> MutexGuard<'_, Option<Holder>> {
        self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Free the lock if it is held by `generation` (any holder when `None`)
    fn release(&self, generation: Option<u64>) -> bool {
        let mut holder = self.holder();
        match *holder {
            Some(current) if generation.map_or(true, |g| g == current.generation) => {
                *holder = None;
                self.permit.add_permits(1);
                true
            }
            _ => false,
        }
    }

    /// Force-release a holder older than `max_age`
    fn release_if_stale(&self, max_age: Duration) -> Option<Duration> {
        let mut holder = self.holder();
        match *holder {
            Some(current) if current.since.elapsed() > max_age => {
                *holder = None;
                self.permit.add_permits(1);
                Some(current.since.elapsed())
            }
            _ => None,
        }
    }

    /// Time left before the current holder turns stale
    fn stale_in(&self, max_age: Duration) -> Option<Duration> {
        self.holder()
            .map(|current| max_age.saturating_sub(current.since.elapsed()))
    }
}

/// Counters exposed for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockStats {
    pub entries: usize,
    pub held: usize,
    pub stale_recoveries: u64,
    pub busy_rejections: u64,
}

/// Manages locks for database operations with timeouts and read/write separation
pub struct OperationLock {
    entries: DashMap<String, Arc<LockEntry>>,
    max_lock_age: Duration,
    next_generation: AtomicU64,
    stale_recoveries: AtomicU64,
    busy_rejections: AtomicU64,
}

impl OperationLock {
    /// Create a lock manager with the given staleness threshold
    pub fn new(max_lock_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_lock_age,
            next_generation: AtomicU64::new(1),
            stale_recoveries: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
        }
    }

    pub fn max_lock_age(&self) -> Duration {
        self.max_lock_age
    }

    fn entry(&self, connection_id: &str) -> Arc<LockEntry> {
        if let Some(entry) = self.entries.get(connection_id) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .entries
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(LockEntry::new()));
        Arc::clone(entry.value())
    }

    fn existing(&self, connection_id: &str) -> Option<Arc<LockEntry>> {
        self.entries
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn recover_if_stale(&self, connection_id: &str, entry: &LockEntry) -> bool {
        match entry.release_if_stale(self.max_lock_age) {
            Some(age) => {
                self.stale_recoveries.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Force unlocking connection '{}': lock held for {:?} (limit {:?})",
                    connection_id,
                    age,
                    self.max_lock_age
                );
                true
            }
            None => false,
        }
    }

    /// Wait up to `timeout` for the lock and return the holder generation.
    ///
    /// The wait is sliced at the moment the current holder would turn stale,
    /// so an abandoned lock is recovered even when it goes stale mid-wait.
    async fn acquire_generation(
        &self,
        connection_id: &str,
        timeout: Duration,
    ) -> Result<(Arc<LockEntry>, u64)> {
        let entry = self.entry(connection_id);
        let started = Instant::now();
        // None: the timeout is too large to represent, wait without bound
        let deadline = started.checked_add(timeout);

        loop {
            self.recover_if_stale(connection_id, &entry);

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            // wake just after the holder crosses the threshold
            let stale_wake = entry
                .stale_in(self.max_lock_age)
                .map(|stale_in| stale_in.saturating_add(Duration::from_millis(1)));
            // re-check at least once per max age so a holder taken mid-wait is seen
            let mut slice = self.max_lock_age;
            if let Some(remaining) = remaining {
                slice = slice.min(remaining);
            }
            if let Some(wake) = stale_wake {
                slice = slice.min(wake);
            }

            let acquired = tokio::time::timeout(slice, entry.permit.acquire()).await;

            match acquired {
                Ok(Ok(permit)) => {
                    permit.forget();
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    *entry.holder() = Some(Holder {
                        since: Instant::now(),
                        generation,
                    });
                    log::debug!("Lock acquired for '{}' (generation {})", connection_id, generation);
                    return Ok((Arc::clone(&entry), generation));
                }
                // semaphore closed: the connection was torn down while waiting
                Ok(Err(_)) => break,
                Err(_) if deadline.map_or(false, |d| Instant::now() >= d) => break,
                Err(_) => continue,
            }
        }

        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
        Err(Error::busy(connection_id, started.elapsed()))
    }

    /// Acquire the lock for a connection, waiting at most `timeout`
    pub async fn acquire(&self, connection_id: &str, timeout: Duration) -> bool {
        self.acquire_generation(connection_id, timeout).await.is_ok()
    }

    /// Release the lock for a connection. Releasing a free lock is a no-op.
    pub fn release(&self, connection_id: &str) {
        let released = self
            .existing(connection_id)
            .map(|entry| entry.release(None))
            .unwrap_or(false);
        if !released {
            log::debug!("Release ignored for '{}': lock not held", connection_id);
        }
    }

    /// Non-blocking check; a stale lock is force-released and reported free
    pub fn is_locked(&self, connection_id: &str) -> bool {
        match self.existing(connection_id) {
            Some(entry) => {
                if self.recover_if_stale(connection_id, &entry) {
                    return false;
                }
                entry.holder().is_some()
            }
            None => false,
        }
    }

    /// Scoped acquisition.
    ///
    /// Read-only callers get a no-op guard immediately. Write callers wait
    /// up to `timeout` and receive [`Error::Busy`] if the lock stays taken.
    /// The returned guard releases the lock on drop, on every exit path.
    pub async fn acquire_scoped(
        &self,
        connection_id: &str,
        timeout: Duration,
        read_only: bool,
    ) -> Result<OperationGuard> {
        if read_only {
            return Ok(OperationGuard::read_only(connection_id));
        }

        match self.acquire_generation(connection_id, timeout).await {
            Ok((entry, generation)) => Ok(OperationGuard {
                connection_id: connection_id.to_string(),
                held: Some((entry, generation)),
            }),
            Err(e) => {
                log::error!(
                    "Failed to acquire lock for '{}' - operation in progress",
                    connection_id
                );
                Err(e)
            }
        }
    }

    /// Run `operation` under a scoped acquisition
    pub async fn run_scoped<F, T>(
        &self,
        connection_id: &str,
        timeout: Duration,
        read_only: bool,
        operation: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.acquire_scoped(connection_id, timeout, read_only).await?;
        operation.await
    }

    /// Force unlock a connection regardless of who holds it
    pub fn force_unlock(&self, connection_id: &str) {
        log::warn!("Force unlocking connection '{}'", connection_id);
        if let Some(entry) = self.existing(connection_id) {
            entry.release(None);
        }
    }

    /// Drop the lock entry of a torn-down connection. Pending waiters fail
    /// with `Busy`.
    pub fn cleanup(&self, connection_id: &str) {
        if let Some((_, entry)) = self.entries.remove(connection_id) {
            entry.permit.close();
            log::debug!("Lock entry removed for '{}'", connection_id);
        }
    }

    pub fn stats(&self) -> LockStats {
        let held = self
            .entries
            .iter()
            .filter(|entry| entry.value().holder().is_some())
            .count();

        LockStats {
            entries: self.entries.len(),
            held,
            stale_recoveries: self.stale_recoveries.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
        }
    }
}

impl Default for OperationLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Releases the write lock when dropped.
///
/// Only the generation this guard acquired is released: if the lock was
/// force-recovered as stale and taken by someone else, dropping the old
/// guard leaves the new holder alone.
pub struct OperationGuard {
    connection_id: String,
    held: Option<(Arc<LockEntry>, u64)>,
}

impl OperationGuard {
    fn read_only(connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            held: None,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Whether this guard holds the write lock
    pub fn is_exclusive(&self) -> bool {
        self.held.is_some()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some((entry, generation)) = self.held.take() {
            if entry.release(Some(generation)) {
                log::debug!("Lock released for '{}'", self.connection_id);
            } else {
                log::debug!(
                    "Lock for '{}' already recovered; generation {} not released",
                    self.connection_id,
                    generation
                );
            }
        }
    }
}
