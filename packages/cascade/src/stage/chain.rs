// the single lock shared by every stage in a chain, and the lock-witnessed
// cell type stage state lives in.
//
// a chain of stages serializes through exactly one mutex + condvar pair,
// created alongside the root stage and shared by every continuation stage
// attached below it. stage fields are plain unsynchronized cells; they may
// only be touched while holding that chain's lock. the accessors require a
// borrow of the guard, so the borrow checker keeps references to cell
// contents from outliving the locked section, and keeps mutation exclusive
// per guard.

use std::{
    cell::UnsafeCell,
    sync::{Condvar, Mutex, MutexGuard},
    time::Instant,
};

// lock and condition pair for one chain of stages.
pub(crate) struct ChainLock {
    mutex: Mutex<()>,
    ready: Condvar,
}

impl ChainLock {
    pub(crate) fn new() -> Self {
        ChainLock {
            mutex: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    // acquire the chain lock.
    pub(crate) fn lock(&self) -> ChainGuard<'_> {
        ChainGuard {
            chain: self,
            inner: Some(self.mutex.lock().unwrap()),
        }
    }
}

// witness that the chain lock is held.
//
// the inner mutex guard is absent only transiently, inside `wait_ready*`
// and `unlocked`.
pub(crate) struct ChainGuard<'a> {
    chain: &'a ChainLock,
    inner: Option<MutexGuard<'a, ()>>,
}

impl<'a> ChainGuard<'a> {
    // the lock this guard is holding.
    pub(crate) fn chain(&self) -> &'a ChainLock {
        self.chain
    }

    // block until another thread calls `notify_ready` on this chain.
    // spurious wakeups possible, callers loop on their own condition.
    pub(crate) fn wait_ready(&mut self) {
        let inner = self.inner.take().unwrap();
        self.inner = Some(self.chain.ready.wait(inner).unwrap());
    }

    // block until notified or the deadline passes. returns whether the
    // wait timed out.
    pub(crate) fn wait_ready_until(&mut self, deadline: Instant) -> bool {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return true;
        };
        let inner = self.inner.take().unwrap();
        let (inner, result) = self.chain.ready.wait_timeout(inner, remaining).unwrap();
        self.inner = Some(inner);
        result.timed_out()
    }

    // wake every thread blocked in `wait_ready*` on this chain.
    pub(crate) fn notify_ready(&self) {
        self.chain.ready.notify_all();
    }

    // run `f` with the chain lock released, re-acquiring before returning.
    // user code is always called through this.
    pub(crate) fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.inner = None;
        let value = f();
        self.inner = Some(self.chain.mutex.lock().unwrap());
        value
    }
}

// a cell whose contents are protected by its chain's lock rather than by a
// lock of its own.
//
// soundness: every `Guarded` belongs to exactly one stage, every stage
// belongs to exactly one chain, and the stage layer only hands these
// accessors a guard for its own chain (debug-asserted there). under that
// pairing, the guard borrows taken here are equivalent to having locked a
// mutex around the contents.
pub(crate) struct Guarded<T>(UnsafeCell<T>);

// contents are only reached while the chain lock is held, so sharing the
// cell between threads is as safe as sending the contents between them.
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    pub(crate) fn new(value: T) -> Self {
        Guarded(UnsafeCell::new(value))
    }

    // borrow the contents. `guard` must hold the lock of the chain the
    // owning stage is part of.
    pub(crate) fn borrow<'g>(&'g self, _guard: &'g ChainGuard<'_>) -> &'g T {
        unsafe { &*self.0.get() }
    }

    // mutably borrow the contents. same pairing requirement as `borrow`.
    pub(crate) fn borrow_mut<'g>(&'g self, _guard: &'g mut ChainGuard<'_>) -> &'g mut T {
        unsafe { &mut *self.0.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wait_ready_until_elapses() {
        let chain = ChainLock::new();
        let mut guard = chain.lock();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(guard.wait_ready_until(deadline));
    }

    #[test]
    fn unlocked_releases_and_reacquires() {
        let chain = ChainLock::new();
        let cell = Guarded::new(0u32);
        let mut guard = chain.lock();
        *cell.borrow_mut(&mut guard) = 1;
        let seen = guard.unlocked(|| {
            // the lock must be free here.
            let inner = chain.lock();
            *cell.borrow(&inner)
        });
        assert_eq!(seen, 1);
        assert_eq!(*cell.borrow(&guard), 1);
    }
}
