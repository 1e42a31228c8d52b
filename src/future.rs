//! One-shot Future and Promise handles
//!
//! This module provides the move-only read handle ([`Future`]) and write
//! handle ([`Promise`]) over a shared state cell. A promise is satisfied at
//! most once, with a value or an error; the paired future observes that
//! single outcome through blocking `get()`, timed waits, continuation
//! chaining, or `.await`.
//!
//! Continuations come in two flavors, mirroring the classic split between
//! value- and future-returning callbacks:
//!
//! - [`Future::map`] runs a callback on the satisfied outcome and resolves
//!   the returned future with the callback's return value.
//! - [`Future::then`] runs a callback that itself returns a future; the
//!   outer future resolves only when that inner future does, with the inner
//!   outcome.
//!
//! Both run the callback exactly once, on whatever thread satisfies the
//! source, and both convert panics inside the callback into an error carried
//! by the returned future.
//!
//! # Examples
//!
//! ```rust
//! use minicq::Promise;
//!
//! let promise = Promise::new();
//! let future = promise.get_future().unwrap();
//! promise.set_value(42).unwrap();
//! assert_eq!(future.get().unwrap(), 42);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use futures::task::ArcWake;

use crate::error::{Error, Result};
use crate::state::SharedCell;

/// Outcome of a timed wait on a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The future is satisfied; `get()` will not block.
    Ready,
    /// The wait deadline elapsed before satisfaction.
    Timeout,
}

/// The write side of a one-shot future/promise pair.
pub struct Promise<T> {
    cell: Arc<SharedCell<T>>,
}

impl<T> Promise<T> {
    /// Create a new promise with a fresh, unsatisfied shared state.
    pub fn new() -> Self {
        Self {
            cell: SharedCell::new(None),
        }
    }

    /// Create a promise whose future can request cancellation. The callback
    /// runs at most once, from whichever thread calls `cancel()` first, and
    /// only while the promise is unsatisfied.
    pub fn with_cancel_callback(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cell: SharedCell::new(Some(Box::new(callback))),
        }
    }

    /// Hand out the paired future. May be called exactly once.
    pub fn get_future(&self) -> Result<Future<T>> {
        self.cell.mark_retrieved()?;
        Ok(Future {
            cell: Some(self.cell.clone()),
        })
    }

    /// Satisfy the promise with a value, waking all waiters.
    pub fn set_value(&self, value: T) -> Result<()> {
        self.cell.satisfy(Ok(value))
    }

    /// Satisfy the promise with an error, waking all waiters.
    pub fn set_error(&self, error: Error) -> Result<()> {
        self.cell.satisfy(Err(error))
    }

    /// Check whether the promise has been satisfied.
    pub fn is_satisfied(&self) -> bool {
        self.cell.is_satisfied()
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // Abandoning an unsatisfied promise surfaces a broken-promise error
        // to the paired future. satisfy() re-checks under the cell lock, so
        // a racing set_value wins cleanly.
        if !self.cell.is_satisfied() {
            let _ = self.cell.satisfy(Err(Error::BrokenPromise));
        }
    }
}

/// The read side of a one-shot future/promise pair. Move-only; consuming
/// operations (`get`, `map`, `then`) take `self` so a future is read at most
/// once.
pub struct Future<T> {
    cell: Option<Arc<SharedCell<T>>>,
}

/// Waker that unparks the waiting thread, used by the blocking waits. Same
/// construction as an executor's block_on parker.
struct ThreadUnparker(thread::Thread);

impl ArcWake for ThreadUnparker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.unpark();
    }
}

impl<T> Future<T> {
    /// Create a future with no shared state. Operations on it report
    /// `Error::NoState`.
    pub fn invalid() -> Self {
        Self { cell: None }
    }

    /// Create a future that is already satisfied with the given outcome.
    pub fn ready(result: Result<T>) -> Self {
        let cell = SharedCell::new(None);
        cell.satisfy(result)
            .expect("fresh cell cannot be satisfied");
        Self { cell: Some(cell) }
    }

    /// Whether this future still references a shared state.
    pub fn is_valid(&self) -> bool {
        self.cell.is_some()
    }

    /// Whether the future is satisfied; `get()` will not block.
    pub fn is_ready(&self) -> bool {
        self.cell
            .as_ref()
            .map(|cell| cell.is_satisfied())
            .unwrap_or(false)
    }

    /// Request cancellation of the underlying operation. Returns true only
    /// if the promise registered a cancellation callback and the future was
    /// not yet satisfied; cancelling a completed future is a no-op.
    pub fn cancel(&self) -> bool {
        self.cell
            .as_ref()
            .map(|cell| cell.cancel())
            .unwrap_or(false)
    }

    /// Block the calling thread until the future is satisfied.
    pub fn wait(&self) -> Result<()> {
        let cell = self.cell.as_ref().ok_or(Error::NoState)?;
        block_until(cell, None);
        Ok(())
    }

    /// Block for at most `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> Result<WaitStatus> {
        self.wait_until(Instant::now() + timeout)
    }

    /// Block until `deadline` at the latest.
    pub fn wait_until(&self, deadline: Instant) -> Result<WaitStatus> {
        let cell = self.cell.as_ref().ok_or(Error::NoState)?;
        Ok(block_until(cell, Some(deadline)))
    }

    /// Block until satisfied and consume the outcome.
    pub fn get(mut self) -> Result<T> {
        let cell = self.cell.take().ok_or(Error::NoState)?;
        block_until(&cell, None);
        match cell.try_take() {
            Some(result) => result,
            None => Err(Error::NoState),
        }
    }

    /// Chain a continuation that maps the satisfied outcome to a value.
    ///
    /// The source future is consumed; the returned future resolves with the
    /// continuation's return value, or with `ContinuationPanicked` if the
    /// continuation panics. Cancelling the returned future forwards the
    /// request to the source.
    pub fn map<U, F>(mut self, f: F) -> Future<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        let Some(cell) = self.cell.take() else {
            return Future::ready(Err(Error::NoState));
        };
        let source = cell.clone();
        let promise = Promise::with_cancel_callback(move || {
            source.cancel();
        });
        let chained = promise
            .get_future()
            .expect("fresh promise hands out its future once");
        cell.set_continuation(Box::new(move |result| {
            match catch_unwind(AssertUnwindSafe(|| f(result))) {
                Ok(value) => {
                    let _ = promise.set_value(value);
                }
                Err(payload) => {
                    let _ =
                        promise.set_error(Error::ContinuationPanicked(panic_message(&payload)));
                }
            }
        }));
        chained
    }

    /// Chain a continuation that returns another future, unwrapping it.
    ///
    /// The returned outer future becomes satisfied only when the inner
    /// future produced by the continuation is satisfied, and carries the
    /// inner value or error. A continuation that returns an invalid future
    /// resolves the outer future with `BrokenPromise`; a panicking
    /// continuation resolves it with `ContinuationPanicked`.
    pub fn then<U, F>(mut self, f: F) -> Future<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Future<U> + Send + 'static,
    {
        let Some(cell) = self.cell.take() else {
            return Future::ready(Err(Error::NoState));
        };
        let source = cell.clone();
        let promise = Promise::with_cancel_callback(move || {
            source.cancel();
        });
        let chained = promise
            .get_future()
            .expect("fresh promise hands out its future once");
        cell.set_continuation(Box::new(move |result| {
            let inner = match catch_unwind(AssertUnwindSafe(|| f(result))) {
                Ok(inner) => inner,
                Err(payload) => {
                    let _ =
                        promise.set_error(Error::ContinuationPanicked(panic_message(&payload)));
                    return;
                }
            };
            match inner.into_cell() {
                Some(inner_cell) => {
                    inner_cell.set_continuation(Box::new(move |inner_result| {
                        let _ = match inner_result {
                            Ok(value) => promise.set_value(value),
                            Err(error) => promise.set_error(error),
                        };
                    }));
                }
                None => {
                    let _ = promise.set_error(Error::BrokenPromise);
                }
            }
        }));
        chained
    }

    pub(crate) fn into_cell(mut self) -> Option<Arc<SharedCell<T>>> {
        self.cell.take()
    }
}

/// Park the calling thread until the cell is satisfied or the deadline
/// passes. Registers an unparking waker with the cell so satisfaction from
/// any thread wakes the waiter; spurious unparks simply re-check.
fn block_until<T>(cell: &SharedCell<T>, deadline: Option<Instant>) -> WaitStatus {
    let waker = futures::task::waker(Arc::new(ThreadUnparker(thread::current())));
    loop {
        if cell.register_waker(&waker) {
            return WaitStatus::Ready;
        }
        match deadline {
            None => thread::park(),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return WaitStatus::Timeout;
                }
                thread::park_timeout(deadline - now);
            }
        }
        if cell.is_satisfied() {
            return WaitStatus::Ready;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return WaitStatus::Timeout;
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T> std::future::Future for Future<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(cell) = this.cell.as_ref() else {
            return Poll::Ready(Err(Error::NoState));
        };
        if let Some(result) = cell.try_take() {
            return Poll::Ready(result);
        }
        if cell.register_waker(cx.waker()) {
            // Satisfied between the check and the registration.
            return Poll::Ready(cell.try_take().unwrap_or(Err(Error::NoState)));
        }
        Poll::Pending
    }
}
