//! Example demonstrating the blocking primitives.
//!
//! The first half pokes each primitive directly through its non-blocking API;
//! the second half runs a producer and a consumer on the kernel.

use coop_kernel::{Condition, Kernel, Priority, Task, TaskAction, TaskConfig, TaskId};
use coop_sync::{BinarySemaphore, MessageQueue, Mutex, RecvSlot, Semaphore};

fn main() {
    println!("=== Cooperative Synchronization Primitives Demo ===\n");

    demo_mutex();
    demo_binary_semaphore();
    demo_semaphore();
    demo_message_queue();
    demo_kernel_queue();
}

fn demo_mutex() {
    println!("1. Mutex Example");

    let mutex = Mutex::new();
    let (task1, task2) = (TaskId(1), TaskId(2));

    assert!(mutex.nb_lock(task1));
    println!("   {task1} acquired lock, owner: {:?}", mutex.owner());
    assert!(mutex.nb_lock(task1));
    println!("   {task1} re-acquired lock");
    assert!(!mutex.nb_lock(task2));
    println!("   {task2} refused");

    mutex.unlock();
    let mut blocking = mutex.lock(task2);
    assert!(blocking.poll());
    println!("   {task2} acquired lock through its condition\n");
}

fn demo_binary_semaphore() {
    println!("2. Binary Semaphore Example");

    let sem = BinarySemaphore::new();
    let mut waiters: Vec<_> = (1..=3).map(|id| sem.lock(TaskId(id))).collect();
    for waiter in &mut waiters {
        waiter.poll();
    }
    println!("   owner: {:?}, queue: {:?}", sem.owner(), sem.waiting());

    // Task 2 gives up; its queue entry goes with it.
    waiters.remove(1);
    sem.unlock();
    for waiter in &mut waiters {
        waiter.poll();
    }
    println!("   after abandon + unlock: owner {:?}\n", sem.owner());
}

fn demo_semaphore() {
    println!("3. Counting Semaphore Example");

    let sem = Semaphore::with_max(3, 3);
    sem.nb_acquire();
    sem.nb_acquire();
    println!("   after 2 acquisitions: {}", sem.count());
    if let Err(err) = sem.release().and_then(|()| sem.release()).and_then(|()| sem.release()) {
        println!("   third release rejected: {err}");
    }
    println!("   count: {}\n", sem.count());
}

fn demo_message_queue() {
    println!("4. Message Queue Example");

    let queue = MessageQueue::new(2);
    for word in ["Hello", "World", "!"] {
        match queue.nb_send(word) {
            Ok(()) => println!("   sent {word:?}"),
            Err(rejected) => println!("   queue full, {rejected:?} handed back"),
        }
    }
    while let Some(word) = queue.nb_recv() {
        println!("   received {word:?}");
    }
    println!();
}

fn demo_kernel_queue() {
    println!("5. Producer / Consumer on the kernel");

    let queue = MessageQueue::new(2);
    let producer = {
        let queue = queue.clone();
        let mut next = 0u32;
        Task::from_fn(TaskConfig::new(TaskId(1), Priority(0)), move |_| {
            if next == 4 {
                return Ok(TaskAction::Exit);
            }
            next += 1;
            Ok(TaskAction::block_on(queue.send(next)))
        })
    };
    let consumer = {
        let slot = RecvSlot::new();
        let mut seen = 0;
        Task::from_fn(TaskConfig::new(TaskId(2), Priority(1)), move |_| {
            for item in slot.drain() {
                println!("   consumed {item}");
                seen += 1;
            }
            if seen == 4 {
                return Ok(TaskAction::Exit);
            }
            Ok(TaskAction::block_on(queue.recv(&slot)))
        })
    };

    let kernel = Kernel::builder().register(producer).register(consumer).build();
    match kernel.and_then(|mut kernel| kernel.run()) {
        Ok(cycles) => println!("   done after {cycles} cycles"),
        Err(err) => eprintln!("   kernel error: {err}"),
    }
}
