//! Object pool + scoped handle.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::tracking::PeakTracker;

/// A reusable value object.
///
/// `finish` must clear every transient field so that `is_initialized`
/// reports false afterwards.
pub trait Poolable: Send {
    fn is_initialized(&self) -> bool;
    fn finish(&mut self);
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Shared inner state for the pool.
struct PoolInner<T> {
    name: &'static str,
    idle: Mutex<Vec<T>>,
    factory: Factory<T>,
    max_idle: usize,
    limit: Option<usize>,
    active: AtomicUsize,
    created: AtomicUsize,
    tracker: PeakTracker,
}

impl<T: Poolable> PoolInner<T> {
    fn try_reserve(&self) -> std::result::Result<usize, usize> {
        loop {
            let cur = self.active.load(Ordering::Relaxed);
            if let Some(limit) = self.limit {
                if cur >= limit {
                    return Err(cur);
                }
            }
            if self
                .active
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(cur + 1);
            }
        }
    }

    fn take(&self) -> T {
        let reused = self.idle.lock().pop();
        let obj = match reused {
            Some(obj) => obj,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                tracing::trace!(pool = self.name, "allocating pooled object");
                (self.factory)()
            }
        };
        assert!(
            !obj.is_initialized(),
            "pool '{}' handed out an object that was never finished",
            self.name
        );
        obj
    }

    fn release(&self, mut obj: T) {
        obj.finish();
        assert!(
            !obj.is_initialized(),
            "pool '{}' object still initialized after finish()",
            self.name
        );
        self.active.fetch_sub(1, Ordering::AcqRel);
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(obj);
        }
        // NOTE: surplus objects are simply dropped.
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub name: &'static str,
    pub idle: usize,
    pub active: usize,
    pub created: usize,
    pub peak_active: usize,
}

/// A free list of reusable objects. Cloning shares the same pool.
pub struct ObjectPool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> ObjectPool<T> {
    /// Unbounded pool keeping at most `max_idle` finished objects.
    pub fn new<F>(name: &'static str, max_idle: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(name, max_idle, None, Box::new(factory))
    }

    /// Pool that refuses `try_borrow` once `limit` objects are outstanding.
    pub fn bounded<F>(name: &'static str, max_idle: usize, limit: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(name, max_idle, Some(limit), Box::new(factory))
    }

    fn build(name: &'static str, max_idle: usize, limit: Option<usize>, factory: Factory<T>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                idle: Mutex::new(Vec::with_capacity(max_idle.min(64))),
                factory,
                max_idle,
                limit,
                active: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
                tracker: PeakTracker::new(),
            }),
        }
    }

    /// Borrow an object, ignoring the limit of a bounded pool.
    pub fn borrow(&self) -> Pooled<T> {
        let active = self.inner.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.tracker.record_active(active);
        self.handle()
    }

    pub fn try_borrow(&self) -> Result<Pooled<T>> {
        match self.inner.try_reserve() {
            Ok(active) => {
                self.inner.tracker.record_active(active);
                Ok(self.handle())
            }
            Err(active) => Err(Error::Exhausted {
                pool: self.inner.name,
                active,
                limit: self.inner.limit.unwrap_or(active),
            }),
        }
    }

    fn handle(&self) -> Pooled<T> {
        Pooled {
            inner: Arc::clone(&self.inner),
            obj: Some(self.inner.take()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.inner.name,
            idle: self.inner.idle.lock().len(),
            active: self.inner.active.load(Ordering::Relaxed),
            created: self.inner.created.load(Ordering::Relaxed),
            peak_active: self.inner.tracker.peak(),
        }
    }
}

/// RAII handle to a borrowed object. Dropping it finishes the object and
/// returns it to the pool.
pub struct Pooled<T: Poolable> {
    inner: Arc<PoolInner<T>>,
    obj: Option<T>,
}

impl<T: Poolable> Pooled<T> {
    pub fn pool_name(&self) -> &'static str {
        self.inner.name
    }
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;
    fn deref(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object used after release"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object used after release"),
        }
    }
}

impl<T: Poolable + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.inner.name)
            .field("obj", &self.obj)
            .finish()
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.inner.release(obj);
        }
    }
}
