//! Binary and counting semaphores with FIFO wait queues.
//!
//! A blocking request joins the wait queue the first time its condition is
//! polled and is granted only from the head of the queue. Dropping a
//! condition that never succeeded withdraws its entry, so a task that stopped
//! waiting (another condition won, it was suspended, it exited) is never
//! handed the semaphore later.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use coop_kernel::sync::{Arc, Mutex as Lock};
use coop_kernel::{Condition, TaskId};
use log::trace;

use crate::error::{SyncError, SyncResult};

fn withdraw(queue: &mut VecDeque<TaskId>, task: TaskId) {
    if let Some(position) = queue.iter().position(|waiting| *waiting == task) {
        queue.remove(position);
        trace!("{task} withdrew from semaphore queue");
    }
}

struct BinaryInner {
    owner: Option<TaskId>,
    queue: VecDeque<TaskId>,
}

/// Lock granted to waiting tasks in the order they first asked for it.
///
/// Not re-entrant. `unlock` releases unconditionally.
pub struct BinarySemaphore {
    inner: Arc<Lock<BinaryInner>>,
}

impl BinarySemaphore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Lock::new(BinaryInner {
                owner: None,
                queue: VecDeque::new(),
            })),
        }
    }

    /// Blocking acquisition for `task`.
    pub fn lock(&self, task: TaskId) -> SemaphoreLock {
        SemaphoreLock {
            inner: Arc::clone(&self.inner),
            task,
            queued: false,
            acquired: false,
        }
    }

    /// Takes the semaphore only if it is free and nobody is waiting.
    pub fn nb_lock(&self, task: TaskId) -> bool {
        let mut inner = self.inner.lock();
        if inner.owner.is_none() && inner.queue.is_empty() {
            inner.owner = Some(task);
            true
        } else {
            false
        }
    }

    pub fn unlock(&self) {
        self.inner.lock().owner = None;
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.inner.lock().owner
    }

    /// Queued tasks, head first.
    pub fn waiting(&self) -> Vec<TaskId> {
        self.inner.lock().queue.iter().copied().collect()
    }
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for BinarySemaphore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for BinarySemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BinarySemaphore")
            .field("owner", &inner.owner)
            .field("queue", &inner.queue)
            .finish()
    }
}

/// Condition returned by [`BinarySemaphore::lock`].
pub struct SemaphoreLock {
    inner: Arc<Lock<BinaryInner>>,
    task: TaskId,
    queued: bool,
    acquired: bool,
}

impl Condition for SemaphoreLock {
    fn poll(&mut self) -> bool {
        if self.acquired {
            return true;
        }
        let mut inner = self.inner.lock();
        if !self.queued {
            inner.queue.push_back(self.task);
            self.queued = true;
        }
        if inner.owner.is_none() && inner.queue.front() == Some(&self.task) {
            inner.queue.pop_front();
            inner.owner = Some(self.task);
            self.acquired = true;
            trace!("binary semaphore granted to {}", self.task);
        }
        self.acquired
    }
}

impl Drop for SemaphoreLock {
    fn drop(&mut self) {
        if self.queued && !self.acquired {
            withdraw(&mut self.inner.lock().queue, self.task);
        }
    }
}

struct CountingInner {
    count: usize,
    max: usize,
    queue: VecDeque<TaskId>,
}

/// Counting semaphore.
pub struct Semaphore {
    inner: Arc<Lock<CountingInner>>,
}

impl Semaphore {
    /// Creates a semaphore holding `initial` units, bounded by `usize::MAX`.
    pub fn new(initial: usize) -> Self {
        Self::with_max(initial, usize::MAX)
    }

    /// Creates a semaphore whose count never exceeds `max`. `initial` is
    /// clamped to `max`.
    pub fn with_max(initial: usize, max: usize) -> Self {
        Self {
            inner: Arc::new(Lock::new(CountingInner {
                count: initial.min(max),
                max,
                queue: VecDeque::new(),
            })),
        }
    }

    /// Blocking acquisition of one unit for `task`.
    pub fn acquire(&self, task: TaskId) -> SemaphoreAcquire {
        SemaphoreAcquire {
            inner: Arc::clone(&self.inner),
            task,
            queued: false,
            acquired: false,
        }
    }

    /// Takes a unit only if one is available and nobody is waiting.
    pub fn nb_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.count > 0 && inner.queue.is_empty() {
            inner.count -= 1;
            true
        } else {
            false
        }
    }

    /// Returns a unit.
    pub fn release(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if inner.count >= inner.max {
            return Err(SyncError::Overflow);
        }
        inner.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn max(&self) -> usize {
        self.inner.lock().max
    }

    pub fn waiting(&self) -> Vec<TaskId> {
        self.inner.lock().queue.iter().copied().collect()
    }
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Semaphore")
            .field("count", &inner.count)
            .field("max", &inner.max)
            .field("queue", &inner.queue)
            .finish()
    }
}

/// Condition returned by [`Semaphore::acquire`].
pub struct SemaphoreAcquire {
    inner: Arc<Lock<CountingInner>>,
    task: TaskId,
    queued: bool,
    acquired: bool,
}

impl Condition for SemaphoreAcquire {
    fn poll(&mut self) -> bool {
        if self.acquired {
            return true;
        }
        let mut inner = self.inner.lock();
        if !self.queued {
            inner.queue.push_back(self.task);
            self.queued = true;
        }
        if inner.count > 0 && inner.queue.front() == Some(&self.task) {
            inner.queue.pop_front();
            inner.count -= 1;
            self.acquired = true;
            trace!("semaphore unit granted to {}, {} left", self.task, inner.count);
        }
        self.acquired
    }
}

impl Drop for SemaphoreAcquire {
    fn drop(&mut self) {
        if self.queued && !self.acquired {
            withdraw(&mut self.inner.lock().queue, self.task);
        }
    }
}
