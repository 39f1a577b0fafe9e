//! Lock abstraction for state shared between tasks and the kernel.
//!
//! Mailboxes, notification slots and the internals of the blocking
//! primitives are reachable from several owners (the task body, its handles,
//! the router, conditions polled by the scheduler). They sit behind this
//! `Mutex` so that a `Kernel` stays `Send`. With the `lock-free` feature the
//! lock is a `spin::Mutex`, otherwise a `parking_lot::Mutex`. Neither poisons.

pub use std::sync::Arc;

#[cfg(not(feature = "lock-free"))]
pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
#[cfg(feature = "lock-free")]
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Platform-agnostic mutex wrapper.
///
/// The kernel runs one task step at a time, so this lock is only ever
/// contended when application code shares primitives across OS threads.
pub struct Mutex<T> {
    #[cfg(not(feature = "lock-free"))]
    inner: parking_lot::Mutex<T>,
    #[cfg(feature = "lock-free")]
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting the given value.
    pub fn new(value: T) -> Self {
        Self {
            #[cfg(not(feature = "lock-free"))]
            inner: parking_lot::Mutex::new(value),
            #[cfg(feature = "lock-free")]
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquires the mutex, blocking the calling OS thread until available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> core::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Mutex { .. }")
    }
}
