//! Blocking conditions polled by the scheduler.
//!
//! A task that wants to wait hands the scheduler a list of conditions. Each
//! scheduling cycle the scheduler polls every condition of every blocked
//! task; the task becomes ready in the cycle where any one of them reports
//! `true` (logical OR). A logical AND is built with [`all_of`].
//!
//! # Contract for condition authors
//!
//! - `poll` advances internal state at most once and must not block.
//! - Once a condition reports `true` it should keep reporting `true` until it
//!   is dropped. Built-in conditions guarantee this; wrap ad-hoc closures in
//!   [`latch`] when they cannot.
//! - Conditions take no arguments per poll. Anything they observe has to be
//!   reached through state they share with their creator.
//! - A condition that reserves a resource on first poll must release the
//!   reservation in `Drop`. The scheduler drops every condition of a task as
//!   soon as the task wakes, is suspended, finishes or faults, whichever
//!   condition won.
//!
//! Violations cannot be detected by the kernel.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::time::Instant;

use crate::sync::Arc;

/// A resumable boolean predicate.
pub trait Condition: Send {
    /// Advances the condition once and reports whether it is satisfied.
    fn poll(&mut self) -> bool;
}

impl<F> Condition for F
where
    F: FnMut() -> bool + Send,
{
    fn poll(&mut self) -> bool {
        self()
    }
}

/// Owned, type-erased condition as stored in a task's blocking list.
pub type BoxCondition = Box<dyn Condition>;

/// Source of monotonic time for [`Timeout`].
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary, fixed epoch.
    fn now(&self) -> Duration;
}

/// Clock backed by [`std::time::Instant`]; unaffected by wall-clock changes.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`, saturating at `u64::MAX` nanoseconds.
    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let mut current = self.nanos.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(step);
            match self.nanos.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(seen) => current = seen,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

/// Ready once `duration` has elapsed since construction.
pub struct Timeout {
    clock: Arc<dyn Clock>,
    start: Duration,
    duration: Duration,
    expired: bool,
}

impl Timeout {
    /// Creates a timeout measured on a monotonic clock started now.
    pub fn new(duration: Duration) -> Self {
        Self::with_clock(duration, Arc::new(MonotonicClock::new()))
    }

    /// Creates a timeout measured on `clock`, starting now.
    pub fn with_clock(duration: Duration, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            clock,
            start,
            duration,
            expired: false,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Condition for Timeout {
    fn poll(&mut self) -> bool {
        if !self.expired {
            self.expired = self.clock.now().saturating_sub(self.start) >= self.duration;
        }
        self.expired
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("duration", &self.duration)
            .field("expired", &self.expired)
            .finish()
    }
}

/// Ready after being polled `cycles` times without being ready.
#[derive(Debug, Clone)]
pub struct Delay {
    remaining: u64,
}

impl Delay {
    pub fn new(cycles: u64) -> Self {
        Self { remaining: cycles }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Condition for Delay {
    fn poll(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            false
        } else {
            true
        }
    }
}

/// Makes any condition sticky: after the first `true`, the inner condition is
/// no longer polled.
pub struct Latch<C> {
    inner: C,
    fired: bool,
}

impl<C: Condition> Latch<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            fired: false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Condition> Condition for Latch<C> {
    fn poll(&mut self) -> bool {
        if !self.fired {
            self.fired = self.inner.poll();
        }
        self.fired
    }
}

/// Logical AND over a set of conditions.
///
/// Each member is latched on its own, so a member that was satisfied once
/// counts as satisfied even if the state it observes changes later.
pub struct AllOf {
    members: Vec<(BoxCondition, bool)>,
}

impl AllOf {
    pub fn new(conditions: Vec<BoxCondition>) -> Self {
        Self {
            members: conditions.into_iter().map(|c| (c, false)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Condition for AllOf {
    fn poll(&mut self) -> bool {
        // Poll everything so each member makes progress every cycle.
        let mut all = true;
        for (condition, fired) in &mut self.members {
            if !*fired {
                *fired = condition.poll();
            }
            all &= *fired;
        }
        all
    }
}

/// Timeout on the monotonic clock. See [`Timeout`].
pub fn timeout(duration: Duration) -> Timeout {
    Timeout::new(duration)
}

/// Timeout expressed in nanoseconds.
pub fn timeout_ns(nanos: u64) -> Timeout {
    Timeout::new(Duration::from_nanos(nanos))
}

/// Scheduler-cycle delay. See [`Delay`].
pub fn delay(cycles: u64) -> Delay {
    Delay::new(cycles)
}

/// Sticky wrapper. See [`Latch`].
pub fn latch<C: Condition>(condition: C) -> Latch<C> {
    Latch::new(condition)
}

/// Logical AND. See [`AllOf`]. An empty set is immediately ready.
pub fn all_of(conditions: Vec<BoxCondition>) -> AllOf {
    AllOf::new(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_counts_polls() {
        let mut d = delay(2);
        assert!(!d.poll());
        assert!(!d.poll());
        assert!(d.poll());
        assert!(d.poll());
    }

    #[test]
    fn zero_delay_is_ready_immediately() {
        assert!(delay(0).poll());
    }

    #[test]
    fn timeout_follows_manual_clock_and_latches() {
        let clock = ManualClock::new();
        let mut t = Timeout::with_clock(Duration::from_millis(500), Arc::new(clock.clone()));

        assert!(!t.poll());
        clock.advance(Duration::from_millis(499));
        assert!(!t.poll());
        clock.advance(Duration::from_millis(1));
        assert!(t.poll());
        assert!(t.poll());
    }

    #[test]
    fn zero_timeout_expires_on_first_poll() {
        assert!(timeout_ns(0).poll());
    }

    #[test]
    fn latch_sticks_after_first_true() {
        let mut flips = [true, false, false].into_iter();
        let mut l = latch(move || flips.next().unwrap_or(false));
        assert!(l.poll());
        assert!(l.poll());
        assert!(l.is_fired());
    }

    #[test]
    fn all_of_requires_every_member() {
        let mut both = all_of(vec![Box::new(delay(1)), Box::new(delay(3))]);
        assert!(!both.poll());
        assert!(!both.poll());
        assert!(!both.poll());
        assert!(both.poll());
    }

    #[test]
    fn all_of_keeps_satisfied_members_satisfied() {
        let mut once = [true].into_iter();
        let mut both = all_of(vec![
            Box::new(move || once.next().unwrap_or(false)),
            Box::new(delay(1)),
        ]);
        assert!(!both.poll());
        assert!(both.poll());
    }

    #[test]
    fn monotonic_timeout_starts_at_creation() {
        let mut long = timeout(Duration::from_secs(3600));
        assert!(!long.poll());
        assert!(timeout(Duration::ZERO).poll());
        assert!(!long.poll());
    }
}
