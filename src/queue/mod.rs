//! Completion queue facade and its backends
//!
//! [`CompletionQueue`] is the cheap-to-clone handle users hold; all state
//! lives in a [`QueueBackend`] behind an `Arc`. The production backend is
//! [`EventLoopBackend`]; [`FakeQueueBackend`] is a drop-in test double where
//! completions only happen when the test says so.

mod event_loop;
mod fake;
pub(crate) mod timer;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use event_loop::EventLoopBackend;
pub use fake::FakeQueueBackend;

use crate::future::Future;
use crate::operation::{AsyncOperation, OperationTag};
use crate::rpc::{self, StreamingReadCall, UnaryCall};

/// The operations a completion queue implementation must provide.
///
/// `start_operation` is the building block the higher-level entry points are
/// written in terms of: it registers an operation and invokes `starter` with
/// the minted tag so the caller can begin the underlying asynchronous action.
pub trait QueueBackend: Send + Sync {
    fn run(&self);
    fn shutdown(&self);
    fn cancel_all(&self);
    fn make_deadline_timer(&self, deadline: Instant) -> Future<Instant>;
    fn run_async(&self, functor: Box<dyn FnOnce() + Send>);
    fn start_operation(
        &self,
        op: Arc<dyn AsyncOperation>,
        starter: &mut dyn FnMut(OperationTag),
    ) -> OperationTag;
}

/// Handle to a completion queue. Clones share the same backend, so any
/// clone may submit work, run the loop, or shut the queue down.
#[derive(Clone)]
pub struct CompletionQueue {
    backend: Arc<dyn QueueBackend>,
}

impl CompletionQueue {
    /// Create a queue backed by the production event loop.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(EventLoopBackend::new()))
    }

    /// Create a queue over an explicit backend, typically a
    /// [`FakeQueueBackend`] in tests.
    pub fn with_backend(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    /// Drive the queue on the calling thread until shutdown completes.
    /// Several threads may call this concurrently on clones of the same
    /// queue.
    pub fn run(&self) {
        self.backend.run();
    }

    /// Stop accepting new work and wake every runner. Work already queued
    /// is drained; operations that can no longer complete resolve as
    /// cancelled. Idempotent.
    pub fn shutdown(&self) {
        self.backend.shutdown();
    }

    /// Best-effort cancellation of everything currently outstanding. The
    /// queue keeps running and keeps accepting new work.
    pub fn cancel_all(&self) {
        self.backend.cancel_all();
    }

    /// A future that resolves with the scheduled instant once `deadline`
    /// passes, or with `Error::Cancelled` if the timer is interrupted.
    pub fn make_deadline_timer(&self, deadline: Instant) -> Future<Instant> {
        self.backend.make_deadline_timer(deadline)
    }

    /// Like [`make_deadline_timer`](Self::make_deadline_timer), with the
    /// deadline computed as `delay` from now.
    pub fn make_relative_timer(&self, delay: Duration) -> Future<Instant> {
        self.backend.make_deadline_timer(Instant::now() + delay)
    }

    /// Schedule `functor` to run on one of the queue's runner threads.
    /// Submissions after shutdown are dropped.
    pub fn run_async<F>(&self, functor: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.backend.run_async(Box::new(functor));
    }

    /// Start a unary call and return a future for its response.
    pub fn make_unary_rpc<C>(&self, call: C) -> Future<C::Response>
    where
        C: UnaryCall,
    {
        rpc::start_unary(self.backend.clone(), call)
    }

    /// Start a streaming read call. `on_item` runs once per received item,
    /// on a runner thread; returning false stops reading and finishes the
    /// stream early. The returned future resolves with the call's final
    /// status.
    pub fn make_streaming_read_rpc<C, F>(&self, call: C, on_item: F) -> Future<()>
    where
        C: StreamingReadCall,
        F: FnMut(C::Item) -> bool + Send + 'static,
    {
        rpc::start_streaming_read(self.backend.clone(), call, on_item)
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
