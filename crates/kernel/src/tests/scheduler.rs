use std::sync::{Arc, Mutex};

use crate::condition::delay;
use crate::scheduler::{PriorityScheduler, Scheduler, StepOutcome};
use crate::task::{Priority, Task, TaskAction, TaskConfig, TaskId, TaskState};

type Trace = Arc<Mutex<Vec<u32>>>;

fn recorder(id: u32, priority: u8, trace: &Trace) -> Task {
    let trace = trace.clone();
    let mut task = Task::from_fn(TaskConfig::new(TaskId(id), Priority(priority)), move |_| {
        trace.lock().unwrap().push(id);
        Ok(TaskAction::Yield)
    });
    task.initialize().unwrap();
    task
}

fn started(mut task: Task) -> Task {
    task.initialize().unwrap();
    task
}

#[test]
fn highest_priority_ready_task_runs() {
    let trace = Trace::default();
    let mut tasks = vec![recorder(1, 0, &trace), recorder(2, 5, &trace)];
    let mut scheduler = PriorityScheduler::new();

    for _ in 0..3 {
        scheduler.run_cycle(&mut tasks);
    }

    assert_eq!(*trace.lock().unwrap(), vec![1, 1, 1]);
}

#[test]
fn exactly_one_step_per_cycle() {
    let trace = Trace::default();
    let mut tasks = vec![recorder(1, 1, &trace), recorder(2, 1, &trace), recorder(3, 1, &trace)];
    let mut scheduler = PriorityScheduler::new();

    let report = scheduler.run_cycle(&mut tasks);

    assert_eq!(report.ran, Some(TaskId(1)));
    assert!(matches!(report.outcome, Some(StepOutcome::Yielded)));
    assert_eq!(trace.lock().unwrap().len(), 1);
}

#[test]
fn lower_priority_runs_while_higher_is_blocked() {
    let trace = Trace::default();
    let high = {
        let trace = trace.clone();
        started(Task::from_fn(TaskConfig::new(TaskId(1), Priority(0)), move |ctx| {
            trace.lock().unwrap().push(1);
            if ctx.iteration() == 0 {
                Ok(TaskAction::block_on(delay(2)))
            } else {
                Ok(TaskAction::Exit)
            }
        }))
    };
    let mut tasks = vec![high, recorder(2, 9, &trace)];
    let mut scheduler = PriorityScheduler::new();

    let first = scheduler.run_cycle(&mut tasks);
    assert!(matches!(first.outcome, Some(StepOutcome::Blocked)));

    // The blocked task's delay is polled every cycle even though it loses.
    scheduler.run_cycle(&mut tasks);
    scheduler.run_cycle(&mut tasks);
    let woke = scheduler.run_cycle(&mut tasks);

    assert_eq!(woke.woken, vec![TaskId(1)]);
    assert_eq!(woke.ran, Some(TaskId(1)));
    assert!(matches!(woke.outcome, Some(StepOutcome::Exited)));
    assert_eq!(*trace.lock().unwrap(), vec![1, 2, 2, 1]);
    assert_eq!(tasks.len(), 1);
}

#[test]
fn every_blocked_task_is_polled() {
    let polls = Arc::new(Mutex::new(0u32));
    let counter = polls.clone();
    let sleeper = started(Task::from_fn(TaskConfig::new(TaskId(1), Priority(0)), move |_| {
        let counter = counter.clone();
        Ok(TaskAction::block_on(move || {
            *counter.lock().unwrap() += 1;
            false
        }))
    }));
    let mut tasks = vec![sleeper, recorder(2, 3, &Trace::default())];
    let mut scheduler = PriorityScheduler::new();

    // The first cycle runs the sleeper; it is polled from then on.
    scheduler.run_cycle(&mut tasks);
    for _ in 0..4 {
        scheduler.run_cycle(&mut tasks);
    }

    assert_eq!(*polls.lock().unwrap(), 4);
}

#[test]
fn idle_cycle_reports_nothing() {
    let mut tasks = vec![started(Task::from_fn(
        TaskConfig::new(TaskId(1), Priority(1)),
        |_| Ok(TaskAction::block_on(delay(10))),
    ))];
    let mut scheduler = PriorityScheduler::new();

    scheduler.run_cycle(&mut tasks);
    let idle = scheduler.run_cycle(&mut tasks);

    assert!(idle.is_idle());
    assert!(idle.outcome.is_none());
    assert_eq!(tasks[0].state(), TaskState::Blocked);
}

#[test]
fn faulted_task_is_removed_and_reported() {
    let trace = Trace::default();
    let faulty = started(Task::from_fn(TaskConfig::new(TaskId(1), Priority(0)), |_| {
        Err("bus error".into())
    }));
    let mut tasks = vec![faulty, recorder(2, 1, &trace)];
    let mut scheduler = PriorityScheduler::new();

    let mut report = scheduler.run_cycle(&mut tasks);
    let fault = report.take_fault().expect("fault reported");

    assert_eq!(fault.task(), TaskId(1));
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id(), TaskId(2));

    scheduler.run_cycle(&mut tasks);
    assert_eq!(*trace.lock().unwrap(), vec![2]);
}

#[test]
fn suspended_tasks_are_skipped_until_resumed() {
    let trace = Trace::default();
    let mut tasks = vec![recorder(1, 0, &trace), recorder(2, 1, &trace)];
    let first = tasks[0].handle();
    let mut scheduler = PriorityScheduler::new();

    first.request_suspend();
    scheduler.run_cycle(&mut tasks);
    assert_eq!(tasks[0].state(), TaskState::Suspended);

    first.request_resume();
    scheduler.run_cycle(&mut tasks);

    assert_eq!(*trace.lock().unwrap(), vec![2, 1]);
}

#[test]
fn suspending_a_blocked_task_drops_its_conditions() {
    let mut tasks = vec![started(Task::from_fn(
        TaskConfig::new(TaskId(1), Priority(1)),
        |_| Ok(TaskAction::block_on(delay(0))),
    ))];
    let handle = tasks[0].handle();
    let mut scheduler = PriorityScheduler::new();

    scheduler.run_cycle(&mut tasks);
    handle.request_suspend();
    let report = scheduler.run_cycle(&mut tasks);

    assert!(report.is_idle());
    assert!(report.woken.is_empty());
    assert_eq!(tasks[0].pending_conditions(), 0);
}
