//! Event loop backend
//!
//! The production backend behind [`CompletionQueue`](super::CompletionQueue).
//! Completions flow through an unbounded channel of [`Event`]s; any number of
//! runner threads (each sitting in `run()`) receive events, fire due timers,
//! and dispatch completions through the operation registry.
//!
//! Shutdown is deterministic: once the flag is set, runners drain the event
//! backlog without blocking and exit; the last runner out flushes every
//! still-registered operation with a failed completion, so no future is left
//! unsatisfied and no operation leaks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::config::RUNNER_POLL_INTERVAL_MS;
use crate::error::Error;
use crate::future::{Future, Promise};
use crate::operation::{AsyncOperation, CallableOperation, OperationTag, TimerOperation};
use crate::queue::timer::TimerTable;
use crate::queue::QueueBackend;
use crate::registry::OperationRegistry;

enum Event {
    /// A completion for the operation registered under `tag`.
    Complete { tag: OperationTag, ok: bool },
    /// Forces a runner through its loop to re-check timers and the shutdown
    /// flag.
    Wake,
}

pub struct EventLoopBackend {
    registry: Arc<OperationRegistry>,
    timers: Arc<TimerTable>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    shutdown: AtomicBool,
    runners: AtomicUsize,
    runner_seq: AtomicUsize,
}

impl EventLoopBackend {
    pub fn new() -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            registry: Arc::new(OperationRegistry::new()),
            timers: Arc::new(TimerTable::new()),
            events_tx,
            events_rx,
            shutdown: AtomicBool::new(false),
            runners: AtomicUsize::new(0),
            runner_seq: AtomicUsize::new(0),
        }
    }

    /// Deliver a completion for an operation started through
    /// `start_operation`. This is the entry point for transport glue that
    /// observes the underlying call finishing a step.
    pub fn post_completion(&self, tag: OperationTag, ok: bool) {
        let _ = self.events_tx.send(Event::Complete { tag, ok });
    }

    /// Number of timers currently pending expiry.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of operations currently registered.
    pub fn outstanding_operations(&self) -> usize {
        self.registry.len()
    }

    /// Expire due timers. Tolerant dispatch: with several runners, another
    /// runner's shutdown flush may reap an operation between our pop and our
    /// notify.
    fn fire_due_timers(&self) {
        for tag in self.timers.pop_due(Instant::now()) {
            self.registry.try_notify(tag, true);
        }
    }

    /// How long the runner may block before it must re-check timers.
    fn wait_interval(&self) -> Duration {
        let poll = Duration::from_millis(RUNNER_POLL_INTERVAL_MS);
        match self.timers.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(poll),
            None => poll,
        }
    }

    /// Reap everything still registered after shutdown. Pending timers are
    /// removed first so their tags cannot fire, then every remaining
    /// operation receives a failed completion.
    fn flush_outstanding(&self) {
        let timers = self.timers.drain();
        let ops = self.registry.drain();
        if !timers.is_empty() || !ops.is_empty() {
            tracing::debug!(
                timers = timers.len(),
                operations = ops.len(),
                "flushing outstanding operations"
            );
        }
        for op in ops {
            op.notify(false);
        }
    }
}

impl Default for EventLoopBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBackend for EventLoopBackend {
    fn run(&self) {
        self.runners.fetch_add(1, Ordering::SeqCst);
        let runner = self.runner_seq.fetch_add(1, Ordering::SeqCst);
        let span = tracing::debug_span!("cq_runner", runner);
        let _guard = span.enter();
        tracing::debug!("runner started");

        loop {
            self.fire_due_timers();

            if self.shutdown.load(Ordering::SeqCst) {
                // Drain the backlog without blocking, then exit. Completions
                // posted before shutdown are still delivered as posted.
                match self.events_rx.try_recv() {
                    Ok(Event::Complete { tag, ok }) => {
                        self.registry.try_notify(tag, ok);
                    }
                    Ok(Event::Wake) => {}
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
                continue;
            }

            match self.events_rx.recv_timeout(self.wait_interval()) {
                Ok(Event::Complete { tag, ok }) => {
                    // The shutdown re-check in the submission paths may have
                    // reaped this tag already; registry removal keeps
                    // delivery exactly-once.
                    self.registry.try_notify(tag, ok);
                }
                Ok(Event::Wake) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!("runner exiting");
        if self.runners.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.flush_outstanding();
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("completion queue shutting down");

        let runners = self.runners.load(Ordering::SeqCst);
        for _ in 0..runners.max(1) {
            let _ = self.events_tx.send(Event::Wake);
        }
        if runners == 0 {
            // No runner will drain the backlog; do it here.
            loop {
                match self.events_rx.try_recv() {
                    Ok(Event::Complete { tag, ok }) => {
                        self.registry.try_notify(tag, ok);
                    }
                    Ok(Event::Wake) => {}
                    Err(_) => break,
                }
            }
            self.flush_outstanding();
        }
    }

    fn cancel_all(&self) {
        tracing::debug!("cancelling all pending operations");
        // Draining the table first guarantees none of these timers can still
        // expire; the queued failed completion deregisters each one.
        for tag in self.timers.drain() {
            self.registry.cancel(tag);
            let _ = self.events_tx.send(Event::Complete { tag, ok: false });
        }
        for tag in self.registry.outstanding() {
            self.registry.cancel(tag);
        }
        let _ = self.events_tx.send(Event::Wake);
    }

    fn make_deadline_timer(&self, deadline: Instant) -> Future<Instant> {
        if self.shutdown.load(Ordering::SeqCst) {
            // Refusing new timers here bounds self-rescheduling loops: the
            // cancelled future arrives already satisfied, so a continuation
            // that re-arms on success terminates.
            return Future::ready(Err(Error::Cancelled));
        }

        let slot = Arc::new(OnceLock::new());
        let cancel_slot = slot.clone();
        let timers = self.timers.clone();
        let registry = self.registry.clone();
        let events_tx = self.events_tx.clone();
        let promise = Promise::with_cancel_callback(move || {
            let Some(&tag) = cancel_slot.get() else {
                return;
            };
            // Winning the table removal claims the timer's outcome; losing
            // means it already expired or was drained.
            if timers.remove(tag) {
                registry.cancel(tag);
                let _ = events_tx.send(Event::Complete { tag, ok: false });
            }
        });
        let future = promise
            .get_future()
            .expect("fresh promise hands out its future once");

        let op = Arc::new(TimerOperation::new(deadline, promise));
        let tag = self.registry.start(op, |tag| {
            let _ = slot.set(tag);
            self.timers.insert(deadline, tag);
            let _ = self.events_tx.send(Event::Wake);
        });

        // A shutdown may have slipped in between the first check and the
        // registration, after the final flush already ran. Re-checking here
        // closes that window.
        if self.shutdown.load(Ordering::SeqCst) && self.timers.remove(tag) {
            self.registry.try_notify(tag, false);
        }

        future
    }

    fn run_async(&self, functor: Box<dyn FnOnce() + Send>) {
        if self.shutdown.load(Ordering::SeqCst) {
            tracing::debug!("functor submitted after shutdown, dropping");
            return;
        }
        let op = Arc::new(CallableOperation::new(functor));
        let tag = self.registry.start(op, |tag| {
            let _ = self.events_tx.send(Event::Complete { tag, ok: true });
        });
        if self.shutdown.load(Ordering::SeqCst) {
            self.registry.try_notify(tag, false);
        }
    }

    fn start_operation(
        &self,
        op: Arc<dyn AsyncOperation>,
        starter: &mut dyn FnMut(OperationTag),
    ) -> OperationTag {
        let tag = self.registry.start(op, |tag| starter(tag));
        if self.shutdown.load(Ordering::SeqCst) {
            self.registry.try_notify(tag, false);
        }
        tag
    }
}

impl Drop for EventLoopBackend {
    fn drop(&mut self) {
        // Breaks the backend -> registry -> operation -> backend reference
        // cycle held by streaming operations, and satisfies any future still
        // waiting on an operation that will never complete.
        self.flush_outstanding();
    }
}
