//! Host state pinned to the thread that created it.
//!
//! The host application is single-threaded: its state may only be touched on
//! the main thread. [`ThreadBound`] makes that rule checkable. Access from any
//! other thread is refused with a `ThreadAffinityError` fault instead of
//! racing on the value.

use crate::callable::Fault;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

/// A value that can only be accessed on its owning thread.
///
/// The inner mutex is never contended: only the owner ever gets past the
/// thread check. It exists so the wrapper is `Sync` without unsafe code.
pub struct ThreadBound<T> {
    owner: ThreadId,
    value: Mutex<T>,
}

impl<T> ThreadBound<T> {
    /// Bind `value` to the current thread.
    pub fn new(value: T) -> Self {
        Self::with_owner(value, thread::current().id())
    }

    /// Bind `value` to an explicit owner thread.
    pub fn with_owner(value: T, owner: ThreadId) -> Self {
        Self {
            owner,
            value: Mutex::new(value),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// Fails with a `ThreadAffinityError` fault off the owning thread.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Fault> {
        if !self.is_owner() {
            return Err(Fault::new(
                "ThreadAffinityError",
                format!(
                    "host state owned by {:?} accessed from {:?}",
                    self.owner,
                    thread::current().id()
                ),
            ));
        }
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut guard))
    }
}

impl<T> fmt::Debug for ThreadBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadBound")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_owner_can_mutate() {
        let bound = ThreadBound::new(0u32);
        bound.with(|n| *n += 1).unwrap();
        assert_eq!(bound.with(|n| *n).unwrap(), 1);
    }

    #[test]
    fn test_other_thread_is_refused() {
        let bound = Arc::new(ThreadBound::new(Vec::<u32>::new()));

        let remote = bound.clone();
        let result = thread::spawn(move || remote.with(|v| v.push(1)))
            .join()
            .unwrap();

        let fault = result.unwrap_err();
        assert_eq!(fault.kind, "ThreadAffinityError");
        assert!(bound.with(|v| v.is_empty()).unwrap());
    }
}
