//! Integration tests for blocking primitives driven by the kernel scheduler.

use std::sync::{Arc, Mutex as StdMutex};

use coop_kernel::condition::delay;
use coop_kernel::{
    Kernel, KernelConfig, Priority, Task, TaskAction, TaskBody, TaskConfig, TaskContext, TaskId,
    TaskResult,
};
use coop_sync::{BinarySemaphore, MessageQueue, Mutex, RecvSlot, Semaphore};

type Log = Arc<StdMutex<Vec<String>>>;

/// Takes the mutex, holds it for `hold` cycles, releases it and exits.
fn mutex_worker(id: u32, mutex: &Mutex, hold: u64, log: &Log) -> Task {
    let mutex = mutex.clone();
    let log = log.clone();
    Task::from_fn(TaskConfig::new(TaskId(id), Priority(1)), move |ctx| {
        match ctx.iteration() {
            0 => Ok(TaskAction::block_on(mutex.lock(ctx.id()))),
            1 => {
                assert_eq!(mutex.owner(), Some(ctx.id()));
                log.lock().unwrap().push(format!("{} in", ctx.id()));
                Ok(TaskAction::block_on(delay(hold)))
            }
            _ => {
                log.lock().unwrap().push(format!("{} out", ctx.id()));
                mutex.unlock();
                Ok(TaskAction::Exit)
            }
        }
    })
}

#[test]
fn mutex_serializes_critical_sections() {
    let mutex = Mutex::new();
    let log = Log::default();

    let mut kernel = Kernel::builder()
        .register(mutex_worker(1, &mutex, 2, &log))
        .register(mutex_worker(2, &mutex, 1, &log))
        .build()
        .unwrap();
    kernel.run().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["task#1 in", "task#1 out", "task#2 in", "task#2 out"]
    );
    assert!(!mutex.is_locked());
}

/// Asks for the semaphore during setup and keeps it once granted.
struct Locker {
    sem: BinarySemaphore,
}

impl TaskBody for Locker {
    fn start(&mut self, ctx: &mut TaskContext<'_>) -> TaskResult {
        Ok(TaskAction::block_on(self.sem.lock(ctx.id())))
    }

    fn step(&mut self, _ctx: &mut TaskContext<'_>) -> TaskResult {
        Ok(TaskAction::block_on(delay(u64::MAX)))
    }
}

#[test]
fn semaphore_queue_follows_first_request_order() {
    let sem = BinarySemaphore::new();
    let mut kernel = Kernel::default();
    for id in 1..=3 {
        let body = Locker { sem: sem.clone() };
        kernel
            .add_task(Task::new(TaskConfig::new(TaskId(id), Priority(1)), body))
            .unwrap();
    }

    // One scan polls A, B and C in registry order.
    let report = kernel.run_cycle().unwrap();

    assert_eq!(report.woken, vec![TaskId(1)]);
    assert_eq!(sem.owner(), Some(TaskId(1)));
    assert_eq!(sem.waiting(), vec![TaskId(2), TaskId(3)]);
}

#[test]
fn waiter_that_times_out_is_not_granted() {
    let sem = BinarySemaphore::new();
    assert!(sem.nb_lock(TaskId(99)));
    let outcome = Arc::new(StdMutex::new(None));

    let mut kernel = Kernel::default();
    {
        let sem = sem.clone();
        let outcome = outcome.clone();
        kernel
            .add_task(Task::from_fn(TaskConfig::new(TaskId(1), Priority(1)), move |ctx| {
                if ctx.iteration() == 0 {
                    return Ok(TaskAction::block_on(sem.lock(ctx.id())).or(delay(2)));
                }
                *outcome.lock().unwrap() = Some(sem.owner() == Some(ctx.id()));
                Ok(TaskAction::Exit)
            }))
            .unwrap();
    }

    kernel.run().unwrap();
    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert!(sem.waiting().is_empty());

    sem.unlock();
    assert!(sem.nb_lock(TaskId(5)));
}

#[test]
fn lock_alternative_may_succeed_alongside_delay() {
    let mutex = Mutex::new();
    assert!(mutex.nb_lock(TaskId(99)));
    let owned = Arc::new(StdMutex::new(None));

    let mut kernel = Kernel::default();
    {
        let mutex = mutex.clone();
        let owned = owned.clone();
        kernel
            .add_task(Task::from_fn(TaskConfig::new(TaskId(1), Priority(1)), move |ctx| {
                if ctx.iteration() == 0 {
                    return Ok(TaskAction::block_on(delay(1)).or(mutex.lock(ctx.id())));
                }
                *owned.lock().unwrap() = Some(mutex.owner() == Some(ctx.id()));
                Ok(TaskAction::Exit)
            }))
            .unwrap();
    }

    kernel.run_cycle().unwrap();
    assert!(kernel.run_cycle().unwrap().is_idle());

    // Both alternatives hold in the same scan; the lock is taken anyway.
    mutex.unlock();
    assert_eq!(kernel.run_cycle().unwrap().woken, vec![TaskId(1)]);
    assert_eq!(*owned.lock().unwrap(), Some(true));
    assert_eq!(mutex.owner(), Some(TaskId(1)));
}

#[test]
fn suspended_waiter_leaves_the_queue() {
    let sem = BinarySemaphore::new();
    assert!(sem.nb_lock(TaskId(99)));

    let mut kernel = Kernel::default();
    let waiter = {
        let sem = sem.clone();
        kernel
            .add_task(Task::from_fn(TaskConfig::new(TaskId(1), Priority(1)), move |ctx| {
                Ok(TaskAction::block_on(sem.lock(ctx.id())))
            }))
            .unwrap()
    };

    kernel.run_cycle().unwrap();
    kernel.run_cycle().unwrap();
    assert_eq!(sem.waiting(), vec![TaskId(1)]);

    waiter.request_suspend();
    kernel.run_cycle().unwrap();
    assert!(sem.waiting().is_empty());
}

#[test]
fn shutdown_purges_wait_queues() {
    let sem = Semaphore::new(0);
    let mut kernel = Kernel::default();
    for id in 1..=2 {
        let sem = sem.clone();
        kernel
            .add_task(Task::from_fn(TaskConfig::new(TaskId(id), Priority(1)), move |ctx| {
                Ok(TaskAction::block_on(sem.acquire(ctx.id())))
            }))
            .unwrap();
    }

    for _ in 0..3 {
        kernel.run_cycle().unwrap();
    }
    assert_eq!(sem.waiting(), vec![TaskId(1), TaskId(2)]);

    assert_eq!(kernel.shutdown(), 2);
    assert!(sem.waiting().is_empty());
}

#[test]
fn producer_consumer_through_queue() {
    let queue = MessageQueue::new(2);
    let received = Arc::new(StdMutex::new(Vec::new()));

    let producer = {
        let queue = queue.clone();
        let mut next = 0u32;
        Task::from_fn(TaskConfig::new(TaskId(1), Priority(0)), move |_| {
            if next == 5 {
                return Ok(TaskAction::Exit);
            }
            next += 1;
            Ok(TaskAction::block_on(queue.send(next)))
        })
    };

    let consumer = {
        let queue = queue.clone();
        let received = received.clone();
        let slot = RecvSlot::new();
        Task::from_fn(TaskConfig::new(TaskId(2), Priority(1)), move |_| {
            received.lock().unwrap().extend(slot.drain());
            if received.lock().unwrap().len() == 5 {
                return Ok(TaskAction::Exit);
            }
            Ok(TaskAction::block_on(queue.recv(&slot)))
        })
    };

    let config = KernelConfig::builder().max_cycles(100).build();
    let mut kernel = Kernel::with_config(config)
        .register(producer)
        .register(consumer)
        .build()
        .unwrap();
    kernel.run().unwrap();

    assert_eq!(*received.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(queue.is_empty());
}

#[test]
fn counting_semaphore_limits_concurrency() {
    let sem = Semaphore::new(2);
    let inside = Arc::new(StdMutex::new((0usize, 0usize)));
    let mut kernel = Kernel::default();

    for id in 1..=4 {
        let sem = sem.clone();
        let inside = inside.clone();
        kernel
            .add_task(Task::from_fn(TaskConfig::new(TaskId(id), Priority(1)), move |ctx| {
                match ctx.iteration() {
                    0 => Ok(TaskAction::block_on(sem.acquire(ctx.id()))),
                    1 => {
                        let mut counts = inside.lock().unwrap();
                        counts.0 += 1;
                        counts.1 = counts.1.max(counts.0);
                        Ok(TaskAction::block_on(delay(10)))
                    }
                    _ => {
                        inside.lock().unwrap().0 -= 1;
                        sem.release().unwrap();
                        Ok(TaskAction::Exit)
                    }
                }
            }))
            .unwrap();
    }

    kernel.run().unwrap();

    let (now, peak) = *inside.lock().unwrap();
    assert_eq!(now, 0);
    assert_eq!(peak, 2);
    assert_eq!(sem.count(), 2);
}
