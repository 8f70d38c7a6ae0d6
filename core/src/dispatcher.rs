//! # Call Dispatcher
//!
//! Bounded-concurrency execution of pipeline runs.
//!
//! A run is a *root* unit: it takes one of [`Dispatcher::max_concurrency`]
//! slots when it starts and keeps it while it is actively making progress.
//! A run that waits on a delay is *paused*: its continuation becomes a
//! [`Resumption`] held by the [`DelayScheduler`] and the slot goes back to
//! the dispatcher until the delay elapses.
//!
//! ## Components
//!
//! - [`Dispatcher`] - queues, slot accounting and the dispatch loop
//! - [`RootCall`] / [`Resumption`] - root and nested units of work
//! - [`WorkerPool`] - where units run ([`ThreadPool`], [`TokioWorkerPool`])
//! - [`DelayScheduler`] - hands resumptions back after a delay ([`TokioTimer`])

mod call;
mod call_dispatcher;
mod executor;
mod timer;

pub use call::{CallId, Resumption, RootCall};
pub use call_dispatcher::{DEFAULT_MAX_CONCURRENCY, Dispatcher};
pub use executor::{Job, ThreadPool, TokioWorkerPool, WorkerPool};
pub use timer::{DelayScheduler, TokioTimer};

pub(crate) use executor::panic_message;
