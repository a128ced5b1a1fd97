//! Global surface lock with a stuck-holder watchdog.
//!
//! The browser is one physical resource: one focused tab, one keyboard.
//! Every UI interaction runs under this lock. A generation counter makes
//! force-release safe: a guard dropped after its generation was superseded
//! does not release the permit a newer holder owns.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::{sync::Semaphore, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Holder {
    owner: String,
    acquired_at: Instant,
    generation: u64,
}

#[derive(Debug)]
struct LockInner {
    semaphore: Semaphore,
    holder: Mutex<Option<Holder>>,
    next_generation: AtomicU64,
    /// A hold longer than this is considered stuck.
    ceiling: Duration,
}

/// Exclusive lock over the shared UI surface.
#[derive(Clone)]
pub struct SurfaceLock {
    inner: Arc<LockInner>,
}

impl SurfaceLock {
    #[must_use]
    pub fn new(ceiling: Duration) -> Self {
        Self {
            inner: Arc::new(LockInner {
                semaphore: Semaphore::new(1),
                holder: Mutex::new(None),
                next_generation: AtomicU64::new(1),
                ceiling,
            }),
        }
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// `owner` is a label for logs and stuck-holder reports, typically the
    /// group being processed.
    pub async fn acquire(&self, owner: &str, timeout: Duration) -> Result<SurfaceGuard> {
        let permit = tokio::time::timeout(timeout, self.inner.semaphore.acquire())
            .await
            .map_err(|_| Error::LockTimeout)?
            .map_err(|_| Error::message("surface lock semaphore closed"))?;
        // The permit is restored on guard drop or force-release, never both.
        permit.forget();

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut holder) = self.inner.holder.lock() {
            *holder = Some(Holder {
                owner: owner.to_string(),
                acquired_at: Instant::now(),
                generation,
            });
        }
        debug!(owner, generation, "surface lock acquired");

        Ok(SurfaceGuard {
            inner: Arc::clone(&self.inner),
            generation,
        })
    }

    /// Force-release the lock if the current holder has exceeded the ceiling.
    ///
    /// Returns the evicted owner and how long it held the lock. The stale
    /// guard's eventual drop is a no-op because its generation no longer
    /// matches.
    pub fn force_release_if_stuck(&self) -> Option<(String, Duration)> {
        let mut holder = self.inner.holder.lock().ok()?;
        let current = holder.as_ref()?;
        let held_for = current.acquired_at.elapsed();
        if held_for <= self.inner.ceiling {
            return None;
        }

        let owner = current.owner.clone();
        *holder = None;
        self.inner.semaphore.add_permits(1);
        warn!(owner, held_secs = held_for.as_secs(), "force-released stuck surface lock");
        Some((owner, held_for))
    }

    /// Owner and hold duration of the current holder, if any.
    #[must_use]
    pub fn current_holder(&self) -> Option<(String, Duration)> {
        let holder = self.inner.holder.lock().ok()?;
        holder
            .as_ref()
            .map(|h| (h.owner.clone(), h.acquired_at.elapsed()))
    }

    /// Spawn a background task that checks for a stuck holder every
    /// `interval` until `cancel` fires.
    pub fn spawn_watchdog(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let lock = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        lock.force_release_if_stuck();
                    },
                }
            }
        })
    }
}

/// RAII guard for the surface lock.
#[derive(Debug)]
pub struct SurfaceGuard {
    inner: Arc<LockInner>,
    generation: u64,
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        let Ok(mut holder) = self.inner.holder.lock() else {
            return;
        };
        // Only release if this guard is still the registered holder; if the
        // watchdog already evicted it, the permit belongs to someone else.
        if holder.as_ref().is_some_and(|h| h.generation == self.generation) {
            *holder = None;
            self.inner.semaphore.add_permits(1);
            debug!(generation = self.generation, "surface lock released");
        } else {
            debug!(generation = self.generation, "stale surface guard dropped");
        }
    }
}
