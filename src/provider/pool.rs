//! Process slot pool bounding concurrently running CLI processes.
//!
//! Admission goes through a fair (FIFO) [`Semaphore`]. A [`Slot`] is held
//! for the whole lifetime of one process and gives its capacity back when
//! released or dropped, whichever comes first.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Error type for slot acquisition.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The caller's cancellation token fired while queued.
    #[error("Cancelled while waiting for a process slot")]
    Cancelled,
    /// The pool no longer admits requests.
    #[error("Process pool is closed")]
    Closed,
}

#[derive(Debug)]
struct PoolCounters {
    in_use: AtomicUsize,
    waiting: AtomicUsize,
    high_water_mark: AtomicUsize,
}

/// Bounded or unbounded pool of process slots.
#[derive(Debug)]
pub struct SlotPool {
    id: u64,
    capacity: Option<NonZeroUsize>,
    semaphore: Option<Arc<Semaphore>>,
    closed: CancellationToken,
    counters: Arc<PoolCounters>,
}

impl SlotPool {
    /// Create a pool admitting at most `capacity` concurrent processes.
    #[must_use]
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self::build(Some(capacity))
    }

    /// Create a pool without a concurrency limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    /// Create a pool from an optional configured limit.
    ///
    /// `None` and `Some(0)` both mean unbounded; validation rejects zero
    /// before it gets here.
    #[must_use]
    pub fn from_limit(limit: Option<usize>) -> Self {
        Self::build(limit.and_then(NonZeroUsize::new))
    }

    fn build(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            semaphore: capacity.map(|n| Arc::new(Semaphore::new(n.get()))),
            closed: CancellationToken::new(),
            counters: Arc::new(PoolCounters {
                in_use: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                high_water_mark: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot.
    ///
    /// Waiters are served in arrival order. If `cancel` fires first, the
    /// waiter leaves the queue without ever holding a slot.
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::Cancelled` if the token fires first, or
    /// `AcquireError::Closed` if the pool was closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Slot, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        if self.closed.is_cancelled() {
            return Err(AcquireError::Closed);
        }

        let Some(semaphore) = &self.semaphore else {
            return Ok(self.issue(None));
        };

        let _queued = QueueGuard::enter(&self.counters.waiting);
        let outcome = tokio::select! {
            biased;

            () = cancel.cancelled() => Err(AcquireError::Cancelled),
            () = self.closed.cancelled() => Err(AcquireError::Closed),
            permit = Arc::clone(semaphore).acquire_owned() => {
                permit.map_err(|_| AcquireError::Closed)
            }
        };

        let permit = outcome?;
        Ok(self.issue(Some(permit)))
    }

    /// Take a slot only if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Slot> {
        if self.closed.is_cancelled() {
            return None;
        }
        match &self.semaphore {
            None => Some(self.issue(None)),
            Some(semaphore) => Arc::clone(semaphore)
                .try_acquire_owned()
                .ok()
                .map(|permit| self.issue(Some(permit))),
        }
    }

    fn issue(&self, permit: Option<OwnedSemaphorePermit>) -> Slot {
        let in_use = self.counters.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .high_water_mark
            .fetch_max(in_use, Ordering::SeqCst);
        tracing::trace!(pool = self.id, in_use, "Slot acquired");
        Slot {
            pool_id: self.id,
            permit,
            counters: Arc::clone(&self.counters),
            released: false,
        }
    }

    /// Return a slot to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the slot was issued by a different pool.
    pub fn release(&self, mut slot: Slot) {
        assert_eq!(
            slot.pool_id, self.id,
            "slot released into a pool that did not issue it"
        );
        slot.release_now();
    }

    /// Stop admitting requests; queued waiters get `AcquireError::Closed`.
    ///
    /// Slots already handed out stay valid until released.
    pub fn close(&self) {
        self.closed.cancel();
        if let Some(semaphore) = &self.semaphore {
            semaphore.close();
        }
    }

    /// Configured capacity; `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    /// Slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.counters.in_use.load(Ordering::SeqCst)
    }

    /// Free slots; `None` when unbounded.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Requests currently queued in [`SlotPool::acquire`].
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.counters.waiting.load(Ordering::SeqCst)
    }

    /// Largest number of slots ever held at once.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.counters.high_water_mark.load(Ordering::SeqCst)
    }
}

/// Counts a waiter for as long as its acquire future is alive.
struct QueueGuard<'a>(&'a AtomicUsize);

impl<'a> QueueGuard<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self(waiting)
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A permit to run one CLI process.
///
/// Only a [`SlotPool`] can create one. It is released exactly once: by
/// [`SlotPool::release`] or, on every other path, when dropped.
#[derive(Debug)]
#[must_use = "dropping a slot releases it immediately"]
pub struct Slot {
    pool_id: u64,
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<PoolCounters>,
    released: bool,
}

impl Slot {
    fn release_now(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let previous = self.counters.in_use.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "slot pool in-use counter underflow");
        // Dropping the permit wakes the next waiter.
        self.permit.take();
        tracing::trace!(pool = self.pool_id, in_use = previous - 1, "Slot released");
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release_now();
    }
}
