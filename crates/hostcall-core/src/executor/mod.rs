//! Main-thread executor contract.
//!
//! The host application is not thread-safe: anything that touches its state
//! has to run on its single main thread. A [`MainThreadExecutor`] is the one
//! primitive the bridge needs from the host: "run this closure on the main
//! thread and block until it is done".
//!
//! Any implementation must guarantee that:
//! - a submitted job runs at most once, and only on the main thread,
//! - the submitting thread is released only after the job finished (normally
//!   or by panicking) or once the executor knows it will never run it,
//! - jobs never run concurrently with each other.
//!
//! [`main_thread`] provides the in-process implementation used by the server.

pub mod main_thread;

pub use main_thread::{channel, MainLoop, MainLoopStats, MainThreadQueue};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A unit of work to run on the main thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Access class of a main-thread request.
///
/// `Write` grants exclusive, mutation-permitting access to host state and is
/// what the call trampolines use. `Read` is for introspection-only work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecMode {
    Read,
    #[default]
    Write,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::Read => "read",
            ExecMode::Write => "write",
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The main loop is gone or shutting down; the job was not accepted.
    #[error("main thread is not accepting work")]
    Unavailable,

    /// The job was accepted but dropped unexecuted because the loop stopped.
    #[error("job was dropped before it ran on the main thread")]
    Abandoned,

    /// The job panicked on the main thread.
    #[error("job panicked on the main thread: {0}")]
    Panicked(String),

    /// The caller's wait bound expired. The job may still run later.
    #[error("timed out after {0:?} waiting for the main thread")]
    Timeout(Duration),
}

/// Runs closures on the host's main thread, synchronously.
pub trait MainThreadExecutor: Send + Sync {
    /// Submit `job` and block until it has run on the main thread.
    fn execute_sync(&self, mode: ExecMode, job: Job) -> Result<(), ExecutorError>;
}

impl<E: MainThreadExecutor + ?Sized> MainThreadExecutor for std::sync::Arc<E> {
    fn execute_sync(&self, mode: ExecMode, job: Job) -> Result<(), ExecutorError> {
        (**self).execute_sync(mode, job)
    }
}
