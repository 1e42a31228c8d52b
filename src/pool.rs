//! Dedicated runner threads for a completion queue
//!
//! A [`RunnerPool`] owns a set of named threads, each parked in
//! [`CompletionQueue::run`]. Dropping the pool (or calling `join`) shuts the
//! queue down and joins every thread, so a pool going out of scope never
//! leaves detached runners behind.

use std::thread;

use crate::error::{Error, Result};
use crate::queue::CompletionQueue;

pub struct RunnerPool {
    queue: CompletionQueue,
    handles: Vec<thread::JoinHandle<()>>,
}

impl RunnerPool {
    /// Spawn `threads` runner threads (at least one) driving `queue`.
    pub fn new(queue: CompletionQueue, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let runner_queue = queue.clone();
            let spawned = thread::Builder::new()
                .name(format!("cq-runner-{}", i))
                .spawn(move || runner_queue.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    // Partial pools are not handed out; stop the runners
                    // already spawned before reporting the failure.
                    queue.shutdown();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::Spawn(source.to_string()));
                }
            }
        }
        tracing::info!(threads, "runner pool started");
        Ok(Self { queue, handles })
    }

    /// Spawn one runner per available CPU.
    pub fn with_default_size(queue: CompletionQueue) -> Result<Self> {
        Self::new(queue, num_cpus::get())
    }

    /// The queue this pool is driving.
    pub fn queue(&self) -> &CompletionQueue {
        &self.queue
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Shut the queue down and wait for every runner to exit.
    pub fn join(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.queue.shutdown();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("runner thread panicked");
            }
        }
    }
}

impl Drop for RunnerPool {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
