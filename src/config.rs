//! Configuration constants for the completion queue
//!
//! This module contains tunable parameters that affect runner behavior,
//! particularly around shutdown responsiveness and memory usage.

/// Upper bound on how long a runner blocks waiting for events (in
/// milliseconds)
///
/// Runners wake at least this often to re-check the shutdown flag and the
/// timer table. A smaller value provides more responsive shutdown but uses
/// more CPU cycles, while a larger value reduces wakeups but may delay
/// shutdown by up to this interval.
pub const RUNNER_POLL_INTERVAL_MS: u64 = 50;

/// Expected number of concurrent waiters on a single future
///
/// Used to size the waker list of a shared state cell up front. Most
/// futures have exactly one waiter (the thread blocked in `get()` or a
/// single poller), so this only needs to cover the occasional extra
/// `wait_for` probe.
pub const EXPECTED_WAITER_COUNT: usize = 4;
