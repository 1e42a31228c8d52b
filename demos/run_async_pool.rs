//! Spreads functors over a pool of runner threads.
//!
//! Run with: cargo run --example run_async_pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use minicq::{CompletionQueue, RunnerPool};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let queue = CompletionQueue::new();
    let pool = RunnerPool::with_default_size(queue.clone()).unwrap();
    println!("pool size: {}", pool.size());

    let completed = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = crossbeam_channel::unbounded();
    for i in 0..16 {
        let completed = completed.clone();
        let tx = tx.clone();
        queue.run_async(move || {
            let runner = std::thread::current().name().map(str::to_string);
            completed.fetch_add(1, Ordering::SeqCst);
            tx.send((i, runner)).unwrap();
        });
    }

    for _ in 0..16 {
        let (i, runner) = rx.recv().unwrap();
        println!("task {:2} ran on {}", i, runner.as_deref().unwrap_or("?"));
    }
    println!("completed: {}", completed.load(Ordering::SeqCst));

    pool.join();
}
