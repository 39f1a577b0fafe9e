//! Task control block.
//!
//! A [`Task`] owns a resumable body, its priority and scheduling state, the
//! conditions it is blocked on and the messages it queued during the current
//! step. The mailbox and notification slots live in state shared with every
//! [`TaskHandle`], so other tasks (and the router) can reach them while the
//! task itself sits in the kernel's registry.
//!
//! ```text
//!            run_next() -> Yield
//!   Ready ───────────────────────► Running ──┐
//!     ▲                                │      │ Block(conds)
//!     │ any condition true             │      ▼
//!     └────────────────────────────────┼── Blocked
//!     ▲                                │ Exit / fault
//!     │ resume()                       ▼
//!  Suspended ◄── suspend()          (removed)
//! ```

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use log::{debug, trace};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::{BoxCondition, Condition};
use crate::message::{Message, MessageType, Target};
use crate::notification::{Notifications, NotifyError, Slot};
use crate::sync::{Arc, Mutex};

/// Unique identifier for a task, chosen by application code.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

impl TaskId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Static task priority. Lower values run first.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGHEST: Self = Self(0);
    pub const LOWEST: Self = Self(u8::MAX);
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

/// Task scheduling state.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Selected by the current scheduling cycle.
    Running,
    /// Eligible to run.
    Ready,
    /// Waiting for one of its conditions.
    Blocked,
    /// Parked until explicitly resumed.
    Suspended,
}

/// Error raised by a task body. Any error type converts into it with `?`.
pub type TaskFault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a body returns from a step.
pub type TaskResult = Result<TaskAction, TaskFault>;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0} was already initialized")]
    AlreadyStarted(TaskId),
    #[error("{0} was stepped before initialization")]
    NotStarted(TaskId),
    #[error("{0} has already finished")]
    Finished(TaskId),
    #[error("{task} faulted: {source}")]
    Fault {
        task: TaskId,
        #[source]
        source: TaskFault,
    },
}

impl TaskError {
    /// Task the error belongs to.
    pub fn task(&self) -> TaskId {
        match self {
            Self::AlreadyStarted(id) | Self::NotStarted(id) | Self::Finished(id) => *id,
            Self::Fault { task, .. } => *task,
        }
    }
}

/// Suspension point reached by a task body.
pub enum TaskAction {
    /// Give up the CPU but stay ready.
    Yield,
    /// Sleep until any of the conditions holds.
    Block(Vec<BoxCondition>),
    /// The body is done; the task is removed.
    Exit,
}

impl TaskAction {
    /// Block on a single condition.
    pub fn block_on<C: Condition + 'static>(condition: C) -> Self {
        Self::Block(vec![Box::new(condition)])
    }

    /// Adds an alternative wake-up condition. A `Yield` becomes a block on
    /// `condition` alone; `Exit` is left untouched.
    ///
    /// Every alternative is polled on each scan, so conditions with side
    /// effects (a lock, a queue receive) may also succeed in the scan where
    /// another one woke the task. Check the primitive after waking.
    pub fn or<C: Condition + 'static>(self, condition: C) -> Self {
        match self {
            Self::Block(mut conditions) => {
                conditions.push(Box::new(condition));
                Self::Block(conditions)
            }
            Self::Yield => Self::block_on(condition),
            Self::Exit => Self::Exit,
        }
    }
}

impl fmt::Debug for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yield => f.write_str("Yield"),
            Self::Block(conditions) => write!(f, "Block({} conditions)", conditions.len()),
            Self::Exit => f.write_str("Exit"),
        }
    }
}

/// Behavior of a task.
///
/// `start` runs the setup code up to the first suspension point; `step`
/// resumes from the previous suspension point to the next one. Each call must
/// return promptly: nothing else runs until it does.
pub trait TaskBody: Send + 'static {
    fn start(&mut self, _ctx: &mut TaskContext<'_>) -> TaskResult {
        Ok(TaskAction::Yield)
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> TaskResult;
}

/// Adapter that turns a closure into a [`TaskBody`]. See [`Task::from_fn`].
pub struct FnBody<F> {
    step: F,
}

impl<F> TaskBody for FnBody<F>
where
    F: FnMut(&mut TaskContext<'_>) -> TaskResult + Send + 'static,
{
    fn step(&mut self, ctx: &mut TaskContext<'_>) -> TaskResult {
        (self.step)(ctx)
    }
}

/// Static configuration of a task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub id: TaskId,
    pub priority: Priority,
    pub name: Option<String>,
    /// Number of notification slots.
    pub notifications: usize,
    pub mailbox: bool,
}

impl TaskConfig {
    pub fn new(id: TaskId, priority: Priority) -> Self {
        Self {
            id,
            priority,
            name: None,
            notifications: 0,
            mailbox: true,
        }
    }

    /// Name used to address the task in messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_notifications(mut self, slots: usize) -> Self {
        self.notifications = slots;
        self
    }

    /// Messages routed to a task without a mailbox are dropped, and its
    /// [`TaskContext::wait_for_message`] never holds.
    pub fn without_mailbox(mut self) -> Self {
        self.mailbox = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Suspend,
    Resume,
}

struct TaskShared {
    id: TaskId,
    name: Option<String>,
    mailbox: Mutex<Option<Vec<Message>>>,
    notes: Mutex<Notifications>,
    control: Mutex<Option<Control>>,
}

impl TaskShared {
    fn message_count(&self) -> usize {
        match &*self.mailbox.lock() {
            Some(mailbox) => mailbox.len(),
            None => 0,
        }
    }

    fn take_messages(&self) -> Vec<Message> {
        match &mut *self.mailbox.lock() {
            Some(mailbox) => mem::take(mailbox),
            None => Vec::new(),
        }
    }

    fn deliver(&self, message: Message) -> bool {
        match &mut *self.mailbox.lock() {
            Some(mailbox) => {
                mailbox.push(message);
                true
            }
            None => false,
        }
    }
}

/// Cloneable reference to a task's shared state.
///
/// Handles stay valid after the task is gone; they just stop having any
/// effect on scheduling.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Address that routes messages to this task by handle.
    pub fn target(&self) -> Target {
        Target::Handle(self.shared.id)
    }

    pub fn has_mailbox(&self) -> bool {
        (*self.shared.mailbox.lock()).is_some()
    }

    /// Number of delivered messages the task has not received yet.
    pub fn message_count(&self) -> usize {
        self.shared.message_count()
    }

    /// Copy of the pending mailbox contents, oldest first.
    pub fn mailbox_snapshot(&self) -> Vec<Message> {
        let mailbox = self.shared.mailbox.lock();
        (*mailbox).clone().unwrap_or_default()
    }

    /// Asks the scheduler to suspend the task the next time it scans it.
    pub fn request_suspend(&self) {
        *self.shared.control.lock() = Some(Control::Suspend);
    }

    /// Asks the scheduler to resume the task the next time it scans it.
    pub fn request_resume(&self) {
        *self.shared.control.lock() = Some(Control::Resume);
    }

    pub fn notification_slots(&self) -> usize {
        self.shared.notes.lock().len()
    }

    pub fn notify_set_state(&self, slot: usize, state: u8) -> Result<(), NotifyError> {
        self.shared.notes.lock().set_state(slot, state)
    }

    pub fn notify_inc_state(&self, slot: usize, step: u8) -> Result<(), NotifyError> {
        self.shared.notes.lock().inc_state(slot, step)
    }

    pub fn notify_get_state(&self, slot: usize) -> Result<u8, NotifyError> {
        self.shared.notes.lock().get(slot).map(|s| s.state)
    }

    pub fn notify_set_value(&self, slot: usize, state: u8, value: i64) -> Result<(), NotifyError> {
        self.shared.notes.lock().set_value(slot, state, value)
    }

    pub fn notify_inc_value(&self, slot: usize, state: u8, step: i64) -> Result<(), NotifyError> {
        self.shared.notes.lock().inc_value(slot, state, step)
    }

    pub fn notify_get_value(&self, slot: usize) -> Result<i64, NotifyError> {
        self.shared.notes.lock().get(slot).map(|s| s.value)
    }

    pub fn notify_get(&self, slot: usize) -> Result<Slot, NotifyError> {
        self.shared.notes.lock().get(slot)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

/// Per-step view of the task handed to its body.
pub struct TaskContext<'a> {
    shared: &'a Arc<TaskShared>,
    priority: Priority,
    outbox: &'a mut Vec<Message>,
    iteration: u64,
}

impl TaskContext<'_> {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Number of completed steps before this one (0 during `start`).
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(self.shared),
        }
    }

    /// Queues `message`; it is routed after this step returns.
    pub fn send(&mut self, message: Message) {
        self.outbox.push(message);
    }

    /// Builds a message from this task to `target`.
    pub fn message(&self, kind: MessageType, target: impl Into<Target>) -> Message {
        Message::new(kind, self.shared.id, target)
    }

    /// Drains the mailbox, oldest message first.
    pub fn recv(&mut self) -> Vec<Message> {
        self.shared.take_messages()
    }

    pub fn message_count(&self) -> usize {
        self.shared.message_count()
    }

    /// Condition that holds while this task's mailbox is non-empty.
    pub fn wait_for_message(&self) -> WaitForMessage {
        if self.shared.mailbox.lock().is_none() {
            debug!("{} waits for a message but has no mailbox", self.shared.id);
        }
        WaitForMessage {
            shared: Arc::clone(self.shared),
        }
    }

    /// Condition that clears `slot`'s state on its first poll and then holds
    /// once the state equals `state`.
    pub fn wait_for_notification(
        &self,
        slot: usize,
        state: u8,
    ) -> Result<WaitForNotification, NotifyError> {
        self.shared.notes.lock().get(slot)?;
        Ok(WaitForNotification {
            shared: Arc::clone(self.shared),
            slot,
            state,
            armed: false,
            fired: false,
        })
    }
}

pub struct WaitForMessage {
    shared: Arc<TaskShared>,
}

impl Condition for WaitForMessage {
    fn poll(&mut self) -> bool {
        self.shared.message_count() > 0
    }
}

pub struct WaitForNotification {
    shared: Arc<TaskShared>,
    slot: usize,
    state: u8,
    armed: bool,
    fired: bool,
}

impl Condition for WaitForNotification {
    fn poll(&mut self) -> bool {
        if self.fired {
            return true;
        }
        let mut notes = self.shared.notes.lock();
        if !self.armed {
            self.armed = true;
            // The slot was validated when the condition was built.
            let _ = notes.set_state(self.slot, 0);
        }
        self.fired = notes
            .get(self.slot)
            .map_or(false, |slot| slot.state == self.state);
        self.fired
    }
}

/// Result of resuming a task once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The task may run again next cycle.
    Ready,
    /// The task is waiting on conditions.
    Blocked,
    /// The body completed; the task must be deregistered.
    Finished,
}

#[derive(Debug)]
pub struct StepResult {
    pub status: StepStatus,
    /// Messages the body queued during the step.
    pub messages: Vec<Message>,
}

/// Task control block.
pub struct Task {
    shared: Arc<TaskShared>,
    priority: Priority,
    state: TaskState,
    body: Box<dyn TaskBody>,
    conditions: Vec<BoxCondition>,
    outbox: Vec<Message>,
    started: bool,
    finished: bool,
    steps: u64,
}

impl Task {
    pub fn new(config: TaskConfig, body: impl TaskBody) -> Self {
        let shared = Arc::new(TaskShared {
            id: config.id,
            name: config.name,
            mailbox: Mutex::new(config.mailbox.then(Vec::new)),
            notes: Mutex::new(Notifications::new(config.notifications)),
            control: Mutex::new(None),
        });
        Self {
            shared,
            priority: config.priority,
            state: TaskState::Ready,
            body: Box::new(body),
            conditions: Vec::new(),
            outbox: Vec::new(),
            started: false,
            finished: false,
            steps: 0,
        }
    }

    /// Task whose every step runs `step`. Setup code goes before the closure.
    pub fn from_fn<F>(config: TaskConfig, step: F) -> Self
    where
        F: FnMut(&mut TaskContext<'_>) -> TaskResult + Send + 'static,
    {
        Self::new(config, FnBody { step })
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Completed steps, not counting `start`.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn pending_conditions(&self) -> usize {
        self.conditions.len()
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the body's setup code up to its first suspension point.
    ///
    /// Messages the setup code sent are handed back in the result, even when
    /// it already exited.
    pub fn initialize(&mut self) -> Result<StepResult, TaskError> {
        if self.started {
            return Err(TaskError::AlreadyStarted(self.id()));
        }
        self.started = true;

        let mut ctx = TaskContext {
            shared: &self.shared,
            priority: self.priority,
            outbox: &mut self.outbox,
            iteration: 0,
        };
        let action = self.body.start(&mut ctx);
        let status = self.settle(action)?;
        Ok(StepResult {
            status,
            messages: mem::take(&mut self.outbox),
        })
    }

    /// Resumes the body from its last suspension point to the next one.
    pub fn run_next(&mut self) -> Result<StepResult, TaskError> {
        if !self.started {
            return Err(TaskError::NotStarted(self.id()));
        }
        if self.finished {
            return Err(TaskError::Finished(self.id()));
        }

        self.state = TaskState::Running;
        let mut ctx = TaskContext {
            shared: &self.shared,
            priority: self.priority,
            outbox: &mut self.outbox,
            iteration: self.steps,
        };
        let action = self.body.step(&mut ctx);
        self.steps += 1;

        let status = self.settle(action)?;
        Ok(StepResult {
            status,
            messages: mem::take(&mut self.outbox),
        })
    }

    fn settle(&mut self, action: TaskResult) -> Result<StepStatus, TaskError> {
        let action = match action {
            Ok(action) => action,
            Err(source) => {
                self.finished = true;
                self.state = TaskState::Suspended;
                self.conditions.clear();
                self.outbox.clear();
                return Err(TaskError::Fault {
                    task: self.id(),
                    source,
                });
            }
        };

        match action {
            TaskAction::Yield => {
                self.state = TaskState::Ready;
                Ok(StepStatus::Ready)
            }
            TaskAction::Block(conditions) if conditions.is_empty() => {
                debug!("{} blocked on an empty condition list, treating as yield", self.id());
                self.state = TaskState::Ready;
                Ok(StepStatus::Ready)
            }
            TaskAction::Block(conditions) => {
                trace!("{} blocked on {} conditions", self.id(), conditions.len());
                self.conditions = conditions;
                self.state = TaskState::Blocked;
                Ok(StepStatus::Blocked)
            }
            TaskAction::Exit => {
                debug!("{} finished after {} steps", self.id(), self.steps);
                self.finished = true;
                self.conditions.clear();
                Ok(StepStatus::Finished)
            }
        }
    }

    /// Polls every pending condition of a blocked task. If any holds, the
    /// task becomes ready and its conditions are dropped. Returns whether the
    /// task woke up.
    pub fn wake_if_ready(&mut self) -> bool {
        if self.state != TaskState::Blocked {
            return false;
        }
        let mut ready = false;
        for condition in &mut self.conditions {
            ready |= condition.poll();
        }
        if ready {
            self.state = TaskState::Ready;
            self.conditions.clear();
        }
        ready
    }

    /// Demotes a running task back to ready.
    pub fn preempt(&mut self) {
        if self.state == TaskState::Running {
            self.state = TaskState::Ready;
        }
    }

    /// Applies a suspend/resume request made through a [`TaskHandle`].
    pub fn apply_pending_control(&mut self) {
        let request = self.shared.control.lock().take();
        match request {
            Some(Control::Suspend) => self.suspend(),
            Some(Control::Resume) => self.resume(),
            None => {}
        }
    }

    /// Forces the task into `Suspended`, discarding its conditions.
    pub fn suspend(&mut self) {
        debug!("{} suspended", self.id());
        self.state = TaskState::Suspended;
        self.conditions.clear();
    }

    /// Forces the task into `Ready`, discarding its conditions.
    pub fn resume(&mut self) {
        debug!("{} resumed", self.id());
        self.state = TaskState::Ready;
        self.conditions.clear();
    }

    /// Queues an outgoing message, collected by the next `run_next`.
    pub fn send(&mut self, message: Message) {
        self.outbox.push(message);
    }

    /// Drains the mailbox.
    pub fn recv(&self) -> Vec<Message> {
        self.shared.take_messages()
    }

    pub fn message_count(&self) -> usize {
        self.shared.message_count()
    }

    pub(crate) fn deliver(&self, message: Message) -> bool {
        self.shared.deliver(message)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("conditions", &self.conditions.len())
            .field("steps", &self.steps)
            .finish()
    }
}
