//! Generic bounded pool of reusable slots.
//!
//! A [`ResourcePool`] owns a fixed set of payloads (buffers, connection
//! state, scratch space) checked out by concurrent producers and consumers.
//! Checkout blocks, waits with a timeout, or fails immediately depending on
//! the caller-supplied timeout; return is explicit via
//! [`PoolSlot::recycle`] or implicit on drop, and is idempotent either way.
//!
//! This is the only blocking primitive in the crate: no other operation may
//! park the calling thread.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct State<T> {
    free: VecDeque<T>,
    running: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    slot_free: Condvar,
    capacity: usize,
}

impl<T> Inner<T> {
    /// Return a payload to the free list and wake one waiter.
    ///
    /// Runs even after shutdown: nobody can acquire the returned payload,
    /// but the bookkeeping stays consistent.
    fn put_back(&self, value: T) {
        let mut state = self.state.lock();
        state.free.push_back(value);
        drop(state);
        self.slot_free.notify_one();
    }
}

/// Fixed-capacity pool of reusable payloads of type `T`.
///
/// Cloning the pool is cheap and yields a handle to the same slots, so a
/// pool can be shared across producer and consumer threads the same way a
/// session registry is.
pub struct ResourcePool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ResourcePool<T> {
    /// Build a pool seeded with the given payloads; capacity is their count.
    pub fn new(slots: impl IntoIterator<Item = T>) -> Self {
        let free: VecDeque<T> = slots.into_iter().collect();
        let capacity = free.len();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    free,
                    running: true,
                }),
                slot_free: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Build a pool of `capacity` payloads produced by `init`.
    pub fn from_fn(capacity: usize, init: impl FnMut() -> T) -> Self {
        let mut init = init;
        Self::new((0..capacity).map(|_| init()))
    }

    /// Check out a slot.
    ///
    /// - `None` blocks until a slot frees up or the pool shuts down.
    /// - `Some(Duration::ZERO)` never blocks; fails if nothing is free.
    /// - `Some(d)` waits up to `d`.
    ///
    /// Returns `None` on timeout or shutdown.
    pub fn acquire(&self, timeout: Option<Duration>) -> Option<PoolSlot<T>> {
        let mut state = self.inner.state.lock();

        match timeout {
            Some(d) if d.is_zero() => {}
            Some(d) => {
                let deadline = Instant::now() + d;
                while state.free.is_empty() && state.running {
                    if self
                        .inner
                        .slot_free
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
            }
            None => {
                while state.free.is_empty() && state.running {
                    self.inner.slot_free.wait(&mut state);
                }
            }
        }

        if !state.running {
            return None;
        }

        let value = state.free.pop_front()?;
        tracing::trace!(
            available = state.free.len(),
            capacity = self.inner.capacity,
            "pool slot acquired"
        );
        Some(PoolSlot {
            value: Some(value),
            pool: self.inner.clone(),
        })
    }

    /// [`acquire`](Self::acquire) with the "none" outcome mapped to
    /// [`PoolTimeout`](crate::MediaError::PoolTimeout), for callers
    /// threading the crate's `Result` through with `?`.
    pub fn checkout(&self, timeout: Option<Duration>) -> crate::Result<PoolSlot<T>> {
        self.acquire(timeout).ok_or(crate::MediaError::PoolTimeout)
    }

    /// Number of currently free slots. Advisory: another thread may take or
    /// return a slot before the caller acts on the answer.
    pub fn available(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Total number of slots this pool was built with.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Shut the pool down: every blocked waiter wakes and fails, and all
    /// future acquisitions fail. In-flight slots may still be recycled.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.running = false;
        drop(state);
        self.inner.slot_free.notify_all();
        tracing::debug!(capacity = self.inner.capacity, "resource pool shut down");
    }
}

/// A checked-out slot with exclusive access to its payload.
///
/// Returns to the pool on [`recycle`](Self::recycle) or drop, whichever
/// comes first; the second route is a no-op. Accessing the payload after an
/// explicit recycle panics.
pub struct PoolSlot<T> {
    value: Option<T>,
    pool: Arc<Inner<T>>,
}

impl<T> PoolSlot<T> {
    /// Return the payload to the pool and wake one waiter.
    ///
    /// Calling this more than once is a no-op: only the first call after
    /// acquisition has effect.
    pub fn recycle(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.put_back(value);
        }
    }

    /// Whether the payload has already been returned.
    pub fn is_recycled(&self) -> bool {
        self.value.is_none()
    }
}

impl<T> Deref for PoolSlot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => panic!("pool slot accessed after recycle"),
        }
    }
}

impl<T> DerefMut for PoolSlot<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => panic!("pool slot accessed after recycle"),
        }
    }
}

impl<T> Drop for PoolSlot<T> {
    fn drop(&mut self) {
        self.recycle();
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for PoolSlot<T> {
    fn as_ref(&self) -> &[u8] {
        self.value.as_ref().map(|v| v.as_ref()).unwrap_or(&[])
    }
}
