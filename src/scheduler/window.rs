//! Fixed-capacity admission gate.
//!
//! The window is a fair counting semaphore: `acquire` suspends until a slot is
//! free and waiters are granted slots in the order they arrived. Each slot is
//! an RAII guard, so it is released exactly once, when the attempt that holds
//! it is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct WindowInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    occupied: AtomicUsize,
    peak: AtomicUsize,
}

/// Admission gate bounding the number of in-flight attempts to N.
#[derive(Debug, Clone)]
pub struct ConcurrencyWindow {
    inner: Arc<WindowInner>,
}

impl ConcurrencyWindow {
    /// Creates a window with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                occupied: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for a free slot and occupies it.
    ///
    /// Returns `None` once the window has been closed.
    pub async fn acquire(&self) -> Option<WindowSlot> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .ok()?;
        Some(self.occupy(permit))
    }

    /// Occupies a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<WindowSlot> {
        let permit = Arc::clone(&self.inner.semaphore).try_acquire_owned().ok()?;
        Some(self.occupy(permit))
    }

    fn occupy(&self, permit: OwnedSemaphorePermit) -> WindowSlot {
        let occupied = self.inner.occupied.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(occupied, Ordering::SeqCst);
        WindowSlot {
            inner: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Stops granting slots. Pending and future `acquire` calls return `None`;
    /// slots already granted stay valid until dropped.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    /// Configured number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of slots currently occupied.
    pub fn occupied(&self) -> usize {
        self.inner.occupied.load(Ordering::SeqCst)
    }

    /// Highest occupancy observed since the window was created.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

/// An occupied window slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct WindowSlot {
    inner: Arc<WindowInner>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for WindowSlot {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so `occupied` never
        // exceeds the number of permits actually held.
        self.inner.occupied.fetch_sub(1, Ordering::SeqCst);
    }
}
