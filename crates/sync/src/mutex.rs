//! Task-owned mutual exclusion lock.

use core::fmt;

use coop_kernel::sync::{Arc, Mutex as Lock};
use coop_kernel::{Condition, TaskId};
use log::trace;

/// Lock owned by at most one task at a time.
///
/// Acquisition is re-entrant for the owner and there is no priority
/// elevation. `unlock` releases unconditionally; the kernel does not check
/// who calls it.
pub struct Mutex {
    owner: Arc<Lock<Option<TaskId>>>,
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            owner: Arc::new(Lock::new(None)),
        }
    }

    /// Blocking acquisition for `task`.
    ///
    /// When the condition is combined with others, the task owns the mutex
    /// only if this condition fired; check [`Mutex::owner`] after waking.
    pub fn lock(&self, task: TaskId) -> MutexLock {
        MutexLock {
            owner: Arc::clone(&self.owner),
            task,
            acquired: false,
        }
    }

    /// Takes the mutex if it is free or already held by `task`.
    pub fn nb_lock(&self, task: TaskId) -> bool {
        try_take(&mut self.owner.lock(), task)
    }

    pub fn unlock(&self) {
        if let Some(previous) = self.owner.lock().take() {
            trace!("mutex released by {previous}");
        }
    }

    pub fn owner(&self) -> Option<TaskId> {
        *self.owner.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }
}

fn try_take(owner: &mut Option<TaskId>, task: TaskId) -> bool {
    match *owner {
        Some(current) if current != task => false,
        _ => {
            *owner = Some(task);
            true
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Mutex {
    fn clone(&self) -> Self {
        Self {
            owner: Arc::clone(&self.owner),
        }
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("owner", &self.owner()).finish()
    }
}

/// Condition returned by [`Mutex::lock`].
pub struct MutexLock {
    owner: Arc<Lock<Option<TaskId>>>,
    task: TaskId,
    acquired: bool,
}

impl Condition for MutexLock {
    fn poll(&mut self) -> bool {
        if !self.acquired {
            self.acquired = try_take(&mut self.owner.lock(), self.task);
            if self.acquired {
                trace!("mutex acquired by {}", self.task);
            }
        }
        self.acquired
    }
}
