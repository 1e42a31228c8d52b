//! minicq: a completion-queue based async execution core
//!
//! This crate provides the building blocks for completion-driven
//! asynchronous work:
//! - One-shot, move-only [`Future`]/[`Promise`] pairs with continuation
//!   chaining and cooperative cancellation
//! - A [`CompletionQueue`] with timers, posted functors, and RPC plumbing,
//!   driven by any number of runner threads
//! - A [`RunnerPool`] owning named runner threads with deterministic
//!   shutdown
//! - A [`FakeQueueBackend`] test double where nothing completes until the
//!   test says so
//!
//! # Futures and Promises
//!
//! ```rust
//! use minicq::Promise;
//!
//! let promise = Promise::new();
//! let future = promise.get_future().unwrap();
//! let doubled = future.map(|r| r.unwrap() * 2);
//!
//! promise.set_value(21).unwrap();
//! assert_eq!(doubled.get().unwrap(), 42);
//! ```
//!
//! # Timers on a completion queue
//!
//! ```rust,no_run
//! use minicq::{CompletionQueue, RunnerPool};
//! use std::time::Duration;
//!
//! let queue = CompletionQueue::new();
//! let pool = RunnerPool::new(queue.clone(), 2).unwrap();
//!
//! let fired = queue
//!     .make_relative_timer(Duration::from_millis(50))
//!     .map(|r| r.map(|_| "fired"));
//! assert_eq!(fired.get().unwrap().unwrap(), "fired");
//!
//! pool.join();
//! ```

#![deny(warnings)]

pub mod config;
pub mod future;
pub mod operation;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod rpc;

mod state;

// Re-export core types
pub use future::{Future, Promise, WaitStatus};
pub use operation::{AsyncOperation, OperationTag};
pub use pool::RunnerPool;
pub use queue::{CompletionQueue, EventLoopBackend, FakeQueueBackend, QueueBackend};
pub use registry::OperationRegistry;
pub use rpc::{StreamingReadCall, UnaryCall};

/// Error types for the execution core
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("No shared state")]
        NoState,

        #[error("Future already retrieved")]
        AlreadyRetrieved,

        #[error("Promise already satisfied")]
        AlreadySatisfied,

        #[error("Broken promise")]
        BrokenPromise,

        #[error("Operation cancelled")]
        Cancelled,

        #[error("Deadline exceeded")]
        DeadlineExceeded,

        #[error("Continuation panicked: {0}")]
        ContinuationPanicked(String),

        #[error("RPC failed: {0}")]
        Rpc(String),

        #[error("Failed to spawn runner thread: {0}")]
        Spawn(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}
