//! A mutex that checks invariants on the data it guards.
//!
//! The check runs right after every acquisition and right before every
//! release, so corruption is caught at the lock boundary of the operation
//! that caused it. A failed check is a [`ProtocolViolation`] and is fatal.

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{fatal, CheckResult};

type Check<T> = Box<dyn Fn(&T) -> CheckResult + Send + Sync>;

pub struct InvariantMutex<T> {
    inner: Mutex<T>,
    check: Check<T>,
}

impl<T> InvariantMutex<T> {
    /// Wrap `value`, running `check` at every lock boundary.
    ///
    /// `check` must not try to lock this mutex.
    pub fn new<F>(value: T, check: F) -> Self
    where
        F: Fn(&T) -> CheckResult + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(value),
            check: Box::new(check),
        }
    }

    /// Acquire the lock, blocking until it is available.
    pub fn lock(&self) -> InvariantMutexGuard<'_, T> {
        let guard = self.inner.lock();
        if let Err(violation) = (self.check)(&guard) {
            fatal(violation);
        }
        InvariantMutexGuard {
            guard,
            check: &self.check,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for InvariantMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvariantMutex")
            .field("inner", &self.inner)
            .finish()
    }
}

/// Scoped access to the data; the release check runs on drop.
pub struct InvariantMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    check: &'a Check<T>,
}

impl<T> Deref for InvariantMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for InvariantMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for InvariantMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Already unwinding from a violation: only release the lock.
        if std::thread::panicking() {
            return;
        }
        if let Err(violation) = (self.check)(&self.guard) {
            fatal(violation);
        }
    }
}
