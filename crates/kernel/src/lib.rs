//! # coop-kernel
//!
//! A cooperative, priority-based task kernel. Tasks are resumable bodies that
//! run one step at a time and hand the CPU back by yielding, blocking on
//! conditions or exiting. Nothing is ever preempted.
//!
//! ## Module Overview
//! - [`condition`]    – Blocking conditions and clocks.
//! - [`message`]      – Message values and task addresses.
//! - [`notification`] – Per-task notification slots.
//! - [`task`]         – Task control block, bodies and handles.
//! - [`router`]       – Best-effort point-to-point message delivery.
//! - [`scheduler`]    – Priority scheduler, one task step per cycle.
//! - [`kernel`]       – Registry, service routines and the run loop.
//!
//! Blocking primitives (mutexes, semaphores, queues) live in the
//! `coop-sync` crate and plug in through the [`Condition`] trait.

extern crate alloc;

pub mod condition;
pub mod kernel;
pub mod message;
pub mod notification;
pub mod router;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use condition::{all_of, delay, latch, timeout, timeout_ns, BoxCondition, Condition};
pub use kernel::{FaultPolicy, Kernel, KernelBuilder, KernelConfig, KernelError};
pub use message::{Message, MessageType, Target};
pub use notification::NotifyError;
pub use router::DeliveryStats;
pub use scheduler::{CycleReport, PriorityScheduler, Scheduler, StepOutcome};
pub use task::{
    Priority, Task, TaskAction, TaskBody, TaskConfig, TaskContext, TaskError, TaskHandle, TaskId,
    TaskResult, TaskState,
};

#[cfg(test)]
mod tests;
