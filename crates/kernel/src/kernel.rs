//! Kernel context: task registry, service routines and the scheduling loop.
//!
//! A [`Kernel`] is an ordinary value. Several kernels can live in the same
//! process; nothing is global.

use core::fmt;
use core::mem;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, error};
use thiserror::Error;

use crate::message::{Message, Target};
use crate::router::{self, DeliveryStats};
use crate::scheduler::{CycleReport, PriorityScheduler, Scheduler};
use crate::task::{StepStatus, Task, TaskError, TaskHandle, TaskId, TaskState};

/// What the kernel does when a task body returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Log the fault, drop the task and keep scheduling.
    #[default]
    Isolate,
    /// Drop the task and return the fault from `run_cycle`.
    Halt,
}

/// Configuration for the kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    /// Upper bound on registered tasks; unbounded when `None`.
    pub max_tasks: Option<usize>,
    /// Upper bound on cycles executed by a single `run` call.
    pub max_cycles: Option<u64>,
    /// Called in every cycle where no task was ready.
    pub idle_callback: Option<fn()>,
    pub fault_policy: FaultPolicy,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "coop",
            max_tasks: None,
            max_cycles: None,
            idle_callback: None,
            fault_policy: FaultPolicy::Isolate,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Limits the number of registered tasks.
    pub fn max_tasks(mut self, max: usize) -> Self {
        self.config.max_tasks = Some(max);
        self
    }

    /// Limits the number of cycles a single `run` may execute.
    pub fn max_cycles(mut self, max: u64) -> Self {
        self.config.max_cycles = Some(max);
        self
    }

    /// Sets the idle callback function.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Builds the final configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("a task with id {0} is already registered")]
    DuplicateTask(TaskId),
    #[error("a task named {0:?} is already registered")]
    DuplicateName(String),
    #[error("task registry is full ({0} tasks)")]
    RegistryFull(usize),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("stopped after {0} cycles with tasks still registered")]
    CycleLimit(u64),
}

type ServiceRoutine = Box<dyn FnMut() + Send>;

/// Collects tasks and service routines before the kernel starts.
pub struct KernelBuilder {
    config: KernelConfig,
    tasks: Vec<Task>,
    services: Vec<ServiceRoutine>,
    scheduler: Box<dyn Scheduler>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            services: Vec::new(),
            scheduler: Box::new(PriorityScheduler::new()),
        }
    }

    pub fn register(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn service_routine<F>(mut self, routine: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.services.push(Box::new(routine));
        self
    }

    /// Replaces the default [`PriorityScheduler`].
    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// Registers the collected tasks, in order, and returns the kernel.
    pub fn build(self) -> Result<Kernel, KernelError> {
        let mut kernel = Kernel {
            config: self.config,
            tasks: Vec::new(),
            services: self.services,
            scheduler: self.scheduler,
            setup_messages: Vec::new(),
            cycles: 0,
        };
        for task in self.tasks {
            kernel.add_task(task)?;
        }
        Ok(kernel)
    }
}

/// Cooperative kernel.
pub struct Kernel {
    config: KernelConfig,
    /// Sorted by priority; insertion order among equal priorities.
    tasks: Vec<Task>,
    services: Vec<ServiceRoutine>,
    scheduler: Box<dyn Scheduler>,
    /// Sent by setup code; routed at the start of the next cycle.
    setup_messages: Vec<Message>,
    cycles: u64,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            services: Vec::new(),
            scheduler: Box::new(PriorityScheduler::new()),
            setup_messages: Vec::new(),
            cycles: 0,
        }
    }

    pub fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Registers a task, running its setup code first if it has not been
    /// initialized yet.
    ///
    /// A task whose setup code already exits is never inserted. The returned
    /// handle stays usable either way. Messages sent by the setup code are
    /// routed at the start of the next cycle, so their targets may be
    /// registered afterwards.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskHandle, KernelError> {
        if self.tasks.iter().any(|t| t.id() == task.id()) {
            return Err(KernelError::DuplicateTask(task.id()));
        }
        if let Some(name) = task.name() {
            if self.tasks.iter().any(|t| t.name() == Some(name)) {
                return Err(KernelError::DuplicateName(name.into()));
            }
        }
        if let Some(max) = self.config.max_tasks {
            if self.tasks.len() >= max {
                return Err(KernelError::RegistryFull(max));
            }
        }

        let handle = task.handle();
        if !task.is_started() {
            let setup = task.initialize()?;
            self.setup_messages.extend(setup.messages);
            if setup.status == StepStatus::Finished {
                debug!("{} exited during setup, not registered", task.id());
                return Ok(handle);
            }
        }
        if task.is_finished() {
            return Ok(handle);
        }

        debug!(
            "[{}] registered {} at priority {}",
            self.config.name,
            task.id(),
            task.priority().0
        );
        let position = self.tasks.partition_point(|t| t.priority() <= task.priority());
        self.tasks.insert(position, task);
        Ok(handle)
    }

    /// Adds a routine invoked once per cycle, before scheduling.
    pub fn add_service_routine<F>(&mut self, routine: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.services.push(Box::new(routine));
    }

    /// Routes a message from outside any task.
    pub fn post(&self, message: Message) -> bool {
        router::deliver_messages(vec![message], &self.tasks).delivered == 1
    }

    /// Runs one scheduling cycle: service routines, delivery of setup-time
    /// messages, one task step, idle callback when nothing ran, message
    /// delivery, fault handling.
    pub fn run_cycle(&mut self) -> Result<CycleReport, KernelError> {
        for service in &mut self.services {
            service();
        }

        let setup = if self.setup_messages.is_empty() {
            DeliveryStats::default()
        } else {
            router::deliver_messages(mem::take(&mut self.setup_messages), &self.tasks)
        };

        let mut report = self.scheduler.run_cycle(&mut self.tasks);
        report.delivery = setup;
        self.cycles += 1;

        if report.is_idle() {
            if let Some(idle) = self.config.idle_callback {
                idle();
            }
        }

        if !report.messages.is_empty() {
            report.delivery += router::deliver_messages(report.messages.clone(), &self.tasks);
        }

        match self.config.fault_policy {
            FaultPolicy::Isolate => {
                if let Some(err) = report.fault() {
                    error!("[{}] {err}", self.config.name);
                }
            }
            FaultPolicy::Halt => {
                if let Some(err) = report.take_fault() {
                    return Err(err.into());
                }
            }
        }

        Ok(report)
    }

    /// Runs cycles until no task is left and returns how many ran.
    pub fn run(&mut self) -> Result<u64, KernelError> {
        let mut ran = 0;
        while !self.tasks.is_empty() {
            if let Some(limit) = self.config.max_cycles {
                if ran >= limit {
                    return Err(KernelError::CycleLimit(ran));
                }
            }
            self.run_cycle()?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Drops every task and service routine. Returns the number of tasks
    /// that were still registered.
    pub fn shutdown(&mut self) -> usize {
        let remaining = self.tasks.len();
        self.tasks.clear();
        self.services.clear();
        self.setup_messages.clear();
        debug!("[{}] shut down with {remaining} tasks", self.config.name);
        remaining
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cycles executed since the kernel was created.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn handle(&self, target: &Target) -> Option<TaskHandle> {
        router::resolve(target, &self.tasks).map(Task::handle)
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.iter().find(|t| t.id() == id).map(Task::state)
    }

    /// Registered task ids in scheduling order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(Task::id).collect()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.config.name)
            .field("tasks", &self.tasks)
            .field("services", &self.services.len())
            .field("cycles", &self.cycles)
            .finish()
    }
}
