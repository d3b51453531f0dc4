//! The [`Executor`] capability a [`super::SendTransport`] must provide.
//!
//! See spec.md §9 "Virtual dispatch": the scheduler is generic over a
//! transport capability rather than relying on inheritance.

use std::time::Duration;

/// Runs tasks the send scheduler hands it, either immediately or after a
/// delay.
///
/// Implementations must not call back into the scheduler that posted the
/// task from within [`Executor::post`]/[`Executor::post_delayed`] itself if
/// doing so would reenter a locked region — see spec.md §5 "Re-entrancy
/// rule". The scheduler only ever posts tasks after releasing its internal
/// lock, so a synchronous executor (like [`InlineExecutor`]) is safe to use.
pub trait Executor: Clone + Send + Sync + 'static {
    /// Runs `task`, now or later.
    fn post(&self, task: impl FnOnce() + Send + 'static);

    /// Runs `task` after `delay` has elapsed.
    fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static);
}

/// An [`Executor`] that runs every task synchronously on the calling thread.
///
/// Useful for tests and doctests where a real thread pool is unnecessary
/// overhead; [`Executor::post_delayed`] blocks the calling thread for the
/// delay via [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn post(&self, task: impl FnOnce() + Send + 'static) {
        task();
    }

    fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        task();
    }
}

/// An [`Executor`] that runs each task on its own detached OS thread.
///
/// This is a minimal stand-in for a real thread pool, sufficient for tests
/// that need genuine concurrency (e.g. the pacer sleeping without blocking
/// the caller); production embedders are expected to bring their own
/// `Executor` backed by a real pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPoolExecutor;

impl Executor for ThreadPoolExecutor {
    fn post(&self, task: impl FnOnce() + Send + 'static) {
        std::thread::spawn(task);
    }

    fn post_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            task();
        });
    }
}
