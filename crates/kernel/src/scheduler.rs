//! Cooperative priority scheduler.
//!
//! ## Scheduling Policy
//!
//! 1. The registry is kept sorted by priority, insertion order breaking ties
//! 2. Every blocked task has all of its conditions polled each cycle
//! 3. The first ready task in registry order is selected
//! 4. The selected task is advanced exactly one step
//! 5. Finished and faulted tasks are removed from the registry

use alloc::vec::Vec;
use log::trace;

use crate::message::Message;
use crate::router::DeliveryStats;
use crate::task::{StepStatus, Task, TaskError, TaskId, TaskState};

/// How the task selected by a cycle left its step.
#[derive(Debug)]
pub enum StepOutcome {
    Yielded,
    Blocked,
    Exited,
    /// The task was removed; the error carries the body's fault.
    Faulted(TaskError),
}

/// Summary of one scheduling cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Task that was advanced, if any was ready.
    pub ran: Option<TaskId>,
    pub outcome: Option<StepOutcome>,
    /// Messages emitted by the step, still to be routed.
    pub messages: Vec<Message>,
    /// Tasks whose conditions were satisfied during this cycle.
    pub woken: Vec<TaskId>,
    /// Filled in by the kernel once `messages`, and any messages sent by
    /// setup code since the previous cycle, have been routed.
    pub delivery: DeliveryStats,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.ran.is_none()
    }

    pub fn fault(&self) -> Option<&TaskError> {
        match &self.outcome {
            Some(StepOutcome::Faulted(err)) => Some(err),
            _ => None,
        }
    }

    pub fn take_fault(&mut self) -> Option<TaskError> {
        match self.outcome.take() {
            Some(StepOutcome::Faulted(err)) => Some(err),
            other => {
                self.outcome = other;
                None
            }
        }
    }
}

/// Scheduling policy plugged into a [`Kernel`](crate::kernel::Kernel).
///
/// Implementations receive the registry sorted by priority and may remove
/// tasks from it, but must not reorder it.
pub trait Scheduler: Send {
    fn run_cycle(&mut self, tasks: &mut Vec<Task>) -> CycleReport;
}

/// Runs the highest-priority ready task, one step per cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityScheduler;

impl PriorityScheduler {
    pub fn new() -> Self {
        Self
    }

    fn select(tasks: &mut [Task], report: &mut CycleReport) -> Option<usize> {
        let mut chosen: Option<usize> = None;

        for index in 0..tasks.len() {
            tasks[index].apply_pending_control();

            match tasks[index].state() {
                TaskState::Ready => {
                    chosen.get_or_insert(index);
                }
                TaskState::Blocked => {
                    if tasks[index].wake_if_ready() {
                        trace!("{} woke up", tasks[index].id());
                        report.woken.push(tasks[index].id());
                        chosen.get_or_insert(index);
                    }
                }
                TaskState::Running => match chosen {
                    Some(other) if tasks[other].priority() < tasks[index].priority() => {
                        tasks[index].preempt();
                    }
                    Some(other) => {
                        tasks[other].preempt();
                        chosen = Some(index);
                    }
                    None => chosen = Some(index),
                },
                TaskState::Suspended => {}
            }
        }

        chosen
    }
}

impl Scheduler for PriorityScheduler {
    fn run_cycle(&mut self, tasks: &mut Vec<Task>) -> CycleReport {
        let mut report = CycleReport::default();

        let Some(index) = Self::select(tasks, &mut report) else {
            trace!("no task ready");
            return report;
        };

        let id = tasks[index].id();
        trace!("running {id}");
        report.ran = Some(id);

        let outcome = match tasks[index].run_next() {
            Ok(step) => {
                report.messages = step.messages;
                match step.status {
                    StepStatus::Ready => StepOutcome::Yielded,
                    StepStatus::Blocked => StepOutcome::Blocked,
                    StepStatus::Finished => {
                        tasks.remove(index);
                        StepOutcome::Exited
                    }
                }
            }
            Err(err) => {
                tasks.remove(index);
                StepOutcome::Faulted(err)
            }
        };
        report.outcome = Some(outcome);
        report
    }
}
