//! Reusable response-body buffers.
//!
//! Every request buffers its whole body before anything reaches the wire, so
//! allocating a fresh `Vec` per request would put a malloc/free pair (and a
//! few reallocations while the body grows) on the hot path. The pool keeps a
//! small free list of cleared [`BytesMut`] buffers instead.
//!
//! ```text
//! pool.acquire()          ← pop an idle buffer or allocate one
//!        ↓
//! PooledBuffer            ← RAII guard, derefs to BytesMut
//!        ↓  request runs, handler writes
//! drop(guard)             ← clear() + push back, on *every* exit path
//! ```
//!
//! Release lives in `Drop`, so an early `return`, a `?`, or an unwinding
//! panic all give the buffer back. No code path has to remember to.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tracing::trace;

pub(crate) const DEFAULT_MAX_IDLE: usize = 64;
pub(crate) const DEFAULT_MAX_RETAINED_CAPACITY: usize = 1024 * 1024;
const INITIAL_CAPACITY: usize = 4 * 1024;

/// A shared pool of body buffers.
///
/// Cloning is cheap (one `Arc` increment); every clone hands out and takes
/// back buffers from the same free list. Safe to use from any number of
/// concurrent connection tasks.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

struct Inner {
    idle: Mutex<Vec<BytesMut>>,
    max_idle: usize,
    max_retained_capacity: usize,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub idle: usize,
}

impl PoolStats {
    /// Buffers currently checked out.
    pub fn outstanding(&self) -> u64 {
        // the two counters are loaded separately
        self.acquired.saturating_sub(self.released)
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_IDLE, DEFAULT_MAX_RETAINED_CAPACITY)
    }

    /// `max_idle` caps the free list; a returned buffer whose capacity grew
    /// past `max_retained_capacity` is freed rather than kept, so one huge
    /// response does not pin its allocation forever.
    pub fn with_limits(max_idle: usize, max_retained_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
                max_retained_capacity,
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Checks out a cleared buffer.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.idle().pop();
        let buf = reused.unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY));
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        PooledBuffer { buf, pool: Arc::clone(&self.inner) }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            idle: self.idle().len(),
        }
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<BytesMut>> {
        self.inner.lock_idle()
    }
}

impl Default for BufferPool {
    fn default() -> Self { Self::new() }
}

impl Inner {
    // A panic while holding the lock cannot leave the Vec half-updated
    // (push/pop only), so a poisoned lock is still safe to use.
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<BytesMut>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, mut buf: BytesMut) {
        self.released.fetch_add(1, Ordering::Relaxed);
        if buf.capacity() > self.max_retained_capacity {
            trace!(capacity = buf.capacity(), "dropping oversized body buffer");
            return;
        }
        buf.clear();
        let mut idle = self.lock_idle();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]. Returned to the pool on drop.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<Inner>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut { &self.buf }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut { &mut self.buf }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
