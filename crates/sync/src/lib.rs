//! # coop-sync
//!
//! Blocking primitives for tasks running on the `coop-kernel` scheduler.
//!
//! Every blocking operation is a [`Condition`](coop_kernel::Condition) that a
//! task hands to the scheduler; the non-blocking variants (`nb_*`) answer
//! immediately.
//!
//! ## Primitives
//!
//! - **Mutex**: Re-entrant lock owned by a task, no priority elevation
//! - **BinarySemaphore**: Lock granted in FIFO order of first request
//! - **Semaphore**: Counting semaphore with a FIFO wait queue
//! - **MessageQueue**: Bounded FIFO queue between tasks

extern crate alloc;

pub mod error;
pub mod mutex;
pub mod queue;
pub mod semaphore;

pub use error::{SyncError, SyncResult};
pub use mutex::{Mutex, MutexLock};
pub use queue::{MessageQueue, QueueRecv, QueueSend, RecvSlot};
pub use semaphore::{BinarySemaphore, Semaphore, SemaphoreAcquire, SemaphoreLock};
