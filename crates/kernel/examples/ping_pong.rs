//! Two tasks that wait half a second, ask each other to quit and then exit
//! once their own QUIT arrives. A service routine reports every cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coop_kernel::condition::timeout;
use coop_kernel::{
    Kernel, MessageType, Priority, Task, TaskAction, TaskBody, TaskConfig, TaskContext, TaskId,
    TaskResult,
};

struct Player {
    peer: &'static str,
}

impl TaskBody for Player {
    fn start(&mut self, ctx: &mut TaskContext<'_>) -> TaskResult {
        println!("   {} started", ctx.name().unwrap_or("?"));
        Ok(TaskAction::block_on(timeout(Duration::from_millis(500))))
    }

    fn step(&mut self, ctx: &mut TaskContext<'_>) -> TaskResult {
        let me = ctx.name().unwrap_or("?").to_owned();

        if ctx.iteration() == 0 {
            println!("   {me} sends QUIT to {} and to task3", self.peer);
            let quit = ctx.message(MessageType::QUIT, self.peer);
            ctx.send(quit);
            // Nobody is called task3; this one is dropped.
            let stray = ctx.message(MessageType::QUIT, "task3");
            ctx.send(stray);
            return Ok(TaskAction::block_on(ctx.wait_for_message()));
        }

        for msg in ctx.recv() {
            if msg.is_quit() {
                println!("   {me} got QUIT from {}", msg.source());
                return Ok(TaskAction::Exit);
            }
        }
        Ok(TaskAction::block_on(ctx.wait_for_message()))
    }
}

fn main() {
    println!("=== Cooperative Kernel Ping-Pong ===\n");

    let cycles = Arc::new(AtomicU64::new(0));
    let counter = cycles.clone();

    let task1 = Task::new(
        TaskConfig::new(TaskId(1), Priority(1)).with_name("task1"),
        Player { peer: "task2" },
    );
    let task2 = Task::new(
        TaskConfig::new(TaskId(2), Priority(1)).with_name("task2"),
        Player { peer: "task1" },
    );

    let mut kernel = match Kernel::builder()
        .register(task1)
        .register(task2)
        .service_routine(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .build()
    {
        Ok(kernel) => kernel,
        Err(err) => {
            eprintln!("failed to build kernel: {err}");
            return;
        }
    };

    match kernel.run() {
        Ok(ran) => println!("\n   all tasks finished after {ran} cycles"),
        Err(err) => eprintln!("kernel stopped: {err}"),
    }
    println!("   service routine ran {} times", cycles.load(Ordering::Relaxed));
}
