//! RPC operations layered on a completion queue
//!
//! The queue knows nothing about transports. A call object implements
//! [`UnaryCall`] or [`StreamingReadCall`] over whatever wire machinery it
//! wraps; each method receives the [`OperationTag`] under which the step was
//! registered and must arrange for exactly one completion to be posted for
//! that tag (for example through `EventLoopBackend::post_completion`, or a
//! test's `FakeQueueBackend::simulate_completion`).
//!
//! A streaming read is a chain of registered steps. Each step is the same
//! operation object registered under a fresh tag, so at most one step is
//! outstanding at a time and the state machine below is never re-entered
//! concurrently.

use std::sync::{Arc, Mutex, Weak};

use crate::error::{Error, Result};
use crate::future::{Future, Promise};
use crate::operation::{AsyncOperation, OperationTag};
use crate::queue::QueueBackend;

/// A single request/response call.
///
/// `start` initiates the exchange; once the completion for that tag arrives
/// successfully, `response` is invoked to extract the outcome.
pub trait UnaryCall: Send + 'static {
    type Response: Send + 'static;

    fn start(&mut self, tag: OperationTag);
    fn response(&mut self) -> Result<Self::Response>;
    fn cancel(&mut self);
}

/// A server-streaming call read one item at a time.
///
/// The queue drives the sequence `start`, then `read` repeatedly, then
/// `finish`. After each successful read completion, `take_item` yields the
/// received item, or `None` for end of stream. `status` reports the final
/// call status after the finish step completes.
pub trait StreamingReadCall: Send + 'static {
    type Item: Send + 'static;

    fn start(&mut self, tag: OperationTag);
    fn read(&mut self, tag: OperationTag);
    fn finish(&mut self, tag: OperationTag);
    fn take_item(&mut self) -> Option<Self::Item>;
    fn status(&mut self) -> Result<()>;
    fn cancel(&mut self);
}

struct UnaryInner<C: UnaryCall> {
    call: Option<C>,
    promise: Option<Promise<C::Response>>,
}

struct UnaryOperation<C: UnaryCall> {
    inner: Mutex<UnaryInner<C>>,
}

impl<C: UnaryCall> AsyncOperation for UnaryOperation<C> {
    fn notify(&self, ok: bool) {
        let (promise, call) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(promise) = inner.promise.take() else {
                return;
            };
            (promise, inner.call.take())
        };
        // response() runs with the lock released, so the call may cancel or
        // otherwise re-enter its own future without deadlocking.
        let outcome = match (ok, call) {
            (true, Some(mut call)) => call.response(),
            _ => Err(Error::Cancelled),
        };
        let _ = match outcome {
            Ok(response) => promise.set_value(response),
            Err(error) => promise.set_error(error),
        };
    }

    fn cancel(&self) {
        if let Some(call) = self.inner.lock().unwrap().call.as_mut() {
            call.cancel();
        }
    }
}

pub(crate) fn start_unary<C: UnaryCall>(
    backend: Arc<dyn QueueBackend>,
    call: C,
) -> Future<C::Response> {
    let op = Arc::new_cyclic(|weak: &Weak<UnaryOperation<C>>| {
        let weak = weak.clone();
        let promise = Promise::with_cancel_callback(move || {
            if let Some(op) = weak.upgrade() {
                op.cancel();
            }
        });
        UnaryOperation {
            inner: Mutex::new(UnaryInner {
                call: Some(call),
                promise: Some(promise),
            }),
        }
    });
    let future = {
        let inner = op.inner.lock().unwrap();
        inner
            .promise
            .as_ref()
            .expect("promise is present until the first completion")
            .get_future()
            .expect("fresh promise hands out its future once")
    };
    backend.start_operation(op.clone(), &mut |tag| {
        op.inner
            .lock()
            .unwrap()
            .call
            .as_mut()
            .expect("call present until completion")
            .start(tag);
    });
    future
}

#[derive(Clone, Copy)]
enum StreamPhase {
    /// Waiting for the start step to complete.
    Starting,
    /// Waiting for a read step to complete.
    Reading,
    /// Waiting for the finish step to complete.
    Finishing,
}

#[derive(Clone, Copy)]
enum StreamStep {
    Read,
    Finish,
}

struct StreamInner<C: StreamingReadCall> {
    call: Option<C>,
    on_item: Option<Box<dyn FnMut(C::Item) -> bool + Send>>,
    phase: StreamPhase,
    promise: Option<Promise<()>>,
    cancel_pending: bool,
}

struct StreamingReadOperation<C: StreamingReadCall> {
    backend: Arc<dyn QueueBackend>,
    weak: Weak<Self>,
    inner: Mutex<StreamInner<C>>,
}

impl<C: StreamingReadCall> StreamingReadOperation<C> {
    fn issue(&self, step: StreamStep) {
        let Some(op) = self.weak.upgrade() else {
            return;
        };
        self.backend.start_operation(op, &mut |tag| {
            let mut inner = self.inner.lock().unwrap();
            let call = inner.call.as_mut().expect("call present when issuing a step");
            match step {
                StreamStep::Read => call.read(tag),
                StreamStep::Finish => call.finish(tag),
            }
        });
    }
}

impl<C: StreamingReadCall> AsyncOperation for StreamingReadOperation<C> {
    fn notify(&self, ok: bool) {
        // At most one step is outstanding, so notify itself is serialized;
        // the call and the handler are taken out of the cell before user
        // code runs, so that code may cancel or otherwise re-enter this
        // stream without deadlocking on the cell lock.
        let mut inner = self.inner.lock().unwrap();
        if inner.promise.is_none() {
            return;
        }
        if !ok {
            let promise = inner.promise.take().expect("checked above");
            drop(inner);
            let _ = promise.set_error(Error::Cancelled);
            return;
        }
        match inner.phase {
            StreamPhase::Starting => {
                inner.phase = StreamPhase::Reading;
                drop(inner);
                self.issue(StreamStep::Read);
            }
            StreamPhase::Reading => {
                let mut call = inner
                    .call
                    .take()
                    .expect("call present while a step is outstanding");
                let mut on_item = inner.on_item.take().expect("handler present while reading");
                drop(inner);

                let step = match call.take_item() {
                    Some(item) => {
                        let keep_reading = on_item(item);
                        if std::mem::take(&mut self.inner.lock().unwrap().cancel_pending) {
                            call.cancel();
                        }
                        if keep_reading {
                            StreamStep::Read
                        } else {
                            StreamStep::Finish
                        }
                    }
                    None => StreamStep::Finish,
                };

                let mut inner = self.inner.lock().unwrap();
                inner.call = Some(call);
                inner.on_item = Some(on_item);
                if matches!(step, StreamStep::Finish) {
                    inner.phase = StreamPhase::Finishing;
                }
                drop(inner);
                self.issue(step);
            }
            StreamPhase::Finishing => {
                let promise = inner.promise.take().expect("checked above");
                let mut call = inner
                    .call
                    .take()
                    .expect("call present while a step is outstanding");
                drop(inner);
                let status = call.status();
                self.inner.lock().unwrap().call = Some(call);
                let _ = match status {
                    Ok(()) => promise.set_value(()),
                    Err(error) => promise.set_error(error),
                };
            }
        }
    }

    fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.call.as_mut() {
            Some(call) => call.cancel(),
            // The call is out of the cell while user code runs; notify
            // forwards the cancel once it takes the call back.
            None => inner.cancel_pending = true,
        }
    }
}

pub(crate) fn start_streaming_read<C, F>(
    backend: Arc<dyn QueueBackend>,
    call: C,
    on_item: F,
) -> Future<()>
where
    C: StreamingReadCall,
    F: FnMut(C::Item) -> bool + Send + 'static,
{
    let backend_for_op = backend.clone();
    let op = Arc::new_cyclic(|weak: &Weak<StreamingReadOperation<C>>| {
        let weak_cb = weak.clone();
        let promise = Promise::with_cancel_callback(move || {
            if let Some(op) = weak_cb.upgrade() {
                op.cancel();
            }
        });
        StreamingReadOperation {
            backend: backend_for_op,
            weak: weak.clone(),
            inner: Mutex::new(StreamInner {
                call: Some(call),
                on_item: Some(Box::new(on_item)),
                phase: StreamPhase::Starting,
                promise: Some(promise),
                cancel_pending: false,
            }),
        }
    });
    let future = {
        let inner = op.inner.lock().unwrap();
        inner
            .promise
            .as_ref()
            .expect("promise is present until resolution")
            .get_future()
            .expect("fresh promise hands out its future once")
    };
    backend.start_operation(op.clone(), &mut |tag| {
        op.inner
            .lock()
            .unwrap()
            .call
            .as_mut()
            .expect("call present at start")
            .start(tag);
    });
    future
}
