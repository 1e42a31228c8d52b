//! Fake backend for deterministic tests
//!
//! Nothing completes on its own: timers never expire, functors never run,
//! and RPC steps never advance until the test calls
//! [`FakeQueueBackend::simulate_completion`]. Completions are delivered in
//! submission order, so a test controls both the timing and the success of
//! every operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

use crate::config::RUNNER_POLL_INTERVAL_MS;
use crate::error::Error;
use crate::future::{Future, Promise};
use crate::operation::{AsyncOperation, CallableOperation, OperationTag, TimerOperation};
use crate::queue::QueueBackend;
use crate::registry::OperationRegistry;

pub struct FakeQueueBackend {
    registry: Arc<OperationRegistry>,
    pending: SegQueue<OperationTag>,
    shutdown: AtomicBool,
    park: Mutex<()>,
    unpark: Condvar,
}

impl FakeQueueBackend {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(OperationRegistry::new()),
            pending: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            park: Mutex::new(()),
            unpark: Condvar::new(),
        }
    }

    /// Complete the oldest pending operation, successfully when `ok` is
    /// true and as cancelled otherwise. Returns whether a completion was
    /// delivered.
    pub fn simulate_completion(&self, ok: bool) -> bool {
        match self.pending.pop() {
            Some(tag) => self.registry.try_notify(tag, ok),
            None => false,
        }
    }

    /// Number of operations awaiting a simulated completion.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for FakeQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBackend for FakeQueueBackend {
    /// Parks the calling thread until shutdown. Completions are driven by
    /// `simulate_completion` from the test thread, so a runner has nothing
    /// else to do.
    fn run(&self) {
        let mut guard = self.park.lock().unwrap();
        while !self.shutdown.load(Ordering::SeqCst) {
            let (g, _) = self
                .unpark
                .wait_timeout(guard, Duration::from_millis(RUNNER_POLL_INTERVAL_MS))
                .unwrap();
            guard = g;
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("fake queue shutting down");
        while self.pending.pop().is_some() {}
        for op in self.registry.drain() {
            op.notify(false);
        }
        self.unpark.notify_all();
    }

    fn cancel_all(&self) {
        // Operations stay pending; the test still decides when each
        // completion arrives, and the cancelled ones resolve as no-ops.
        self.registry.cancel_all();
    }

    fn make_deadline_timer(&self, deadline: Instant) -> Future<Instant> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Future::ready(Err(Error::Cancelled));
        }

        let slot = Arc::new(OnceLock::new());
        let cancel_slot = slot.clone();
        let registry = self.registry.clone();
        let promise = Promise::with_cancel_callback(move || {
            if let Some(&tag) = cancel_slot.get() {
                registry.cancel(tag);
            }
        });
        let future = promise
            .get_future()
            .expect("fresh promise hands out its future once");

        let op = Arc::new(TimerOperation::new(deadline, promise));
        self.registry.start(op, |tag| {
            let _ = slot.set(tag);
            self.pending.push(tag);
        });
        future
    }

    fn run_async(&self, functor: Box<dyn FnOnce() + Send>) {
        if self.shutdown.load(Ordering::SeqCst) {
            tracing::debug!("functor submitted after shutdown, dropping");
            return;
        }
        let op = Arc::new(CallableOperation::new(functor));
        self.registry.start(op, |tag| {
            self.pending.push(tag);
        });
    }

    fn start_operation(
        &self,
        op: Arc<dyn AsyncOperation>,
        starter: &mut dyn FnMut(OperationTag),
    ) -> OperationTag {
        let tag = self.registry.start(op, |tag| {
            self.pending.push(tag);
            starter(tag);
        });
        if self.shutdown.load(Ordering::SeqCst) {
            self.registry.try_notify(tag, false);
        }
        tag
    }
}

impl Drop for FakeQueueBackend {
    fn drop(&mut self) {
        for op in self.registry.drain() {
            op.notify(false);
        }
    }
}
