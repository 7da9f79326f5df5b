//! Shutdown signal shared between the server thread and the main loop.
//!
//! The host's main thread cannot `select!` on async signals, so shutdown is a
//! shared flag that the main loop polls between jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable shutdown flag.
///
/// When `trigger()` is called on any clone, all clones observe it.
///
/// # Example
///
/// ```
/// use hostcall_core::shutdown::ShutdownToken;
///
/// let token = ShutdownToken::new();
/// let for_signal_handler = token.clone();
///
/// for_signal_handler.trigger();
/// assert!(token.is_triggered());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    triggered: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}
