//! Counts down with queue timers, then cancels one on purpose.
//!
//! Run with: cargo run --example timer_countdown

use std::time::Duration;

use minicq::{CompletionQueue, RunnerPool};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let queue = CompletionQueue::new();
    let pool = RunnerPool::new(queue.clone(), 2).unwrap();

    for remaining in (1..=3).rev() {
        queue
            .make_relative_timer(Duration::from_millis(200))
            .get()
            .unwrap();
        println!("{}...", remaining);
    }
    println!("liftoff");

    let abandoned = queue.make_relative_timer(Duration::from_secs(3600));
    abandoned.cancel();
    println!("hour-long timer resolved as: {:?}", abandoned.get());

    pool.join();
}
