//! The shared cancellation slot.
//!
//! A [`CancellationSlot`] is a single-assignment cell holding a
//! [`CancellationSignal`] plus the monitor blocked callers wait on. Every façade
//! derived from one root in a fluent expression shares the same slot, so
//! setting it cancels the whole chain at once.
//!
//! The transition from empty to signalled happens at most once; the first
//! caller wins and later calls are no-ops. Setting the slot wakes every thread
//! blocked on it.
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::cancel::CancellationSlot;
//! use lazy_collections::context::TaskId;
//! use lazy_collections::error::CancellationSignal;
//!
//! let slot = CancellationSlot::new();
//! assert!(slot.set(CancellationSignal::new(TaskId::from("list-1"), false)));
//! assert!(!slot.set(CancellationSignal::new(TaskId::from("list-2"), false)));
//! assert_eq!(slot.signal().unwrap().task_id().as_str(), "list-1");
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{CancellationSignal, PipelineError, PipelineResult};

/// A set-once cancellation cell with an attached monitor.
pub struct CancellationSlot {
    is_set: AtomicBool,
    signal: Mutex<Option<CancellationSignal>>,
    monitor: Condvar,
}

impl CancellationSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_set: AtomicBool::new(false),
            signal: Mutex::new(None),
            monitor: Condvar::new(),
        }
    }

    /// Creates an empty slot ready to be shared.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns `true` once a signal has been stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.is_set.load(Ordering::Acquire)
    }

    /// Returns a copy of the stored signal, if any.
    #[must_use]
    pub fn signal(&self) -> Option<CancellationSignal> {
        if !self.is_set() {
            return None;
        }
        self.signal.lock().clone()
    }

    /// Returns the stored signal as an error, if any.
    pub(crate) fn error(&self) -> Option<PipelineError> {
        self.signal().map(PipelineError::Cancelled)
    }

    /// Stores the signal if the slot is still empty and wakes all waiters.
    ///
    /// Returns `true` if this call won the race.
    pub fn set(&self, signal: CancellationSignal) -> bool {
        let mut guard = self.signal.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(signal);
        self.is_set.store(true, Ordering::Release);
        self.monitor.notify_all();
        true
    }

    /// Wakes all waiters so that they re-check their condition.
    pub(crate) fn notify(&self) {
        let _guard = self.signal.lock();
        self.monitor.notify_all();
    }

    /// Blocks until `ready` yields a value, the slot is signalled, or the
    /// timeout elapses.
    ///
    /// `ready` is evaluated while the monitor is held, so a producer that
    /// publishes its value before calling [`CancellationSlot::notify`] can never
    /// be missed.
    pub(crate) fn wait_for<T>(
        &self,
        mut ready: impl FnMut() -> Option<T>,
        timeout: Option<Duration>,
    ) -> PipelineResult<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut guard = self.signal.lock();
        loop {
            if let Some(signal) = guard.as_ref() {
                return Err(PipelineError::Cancelled(signal.clone()));
            }
            if let Some(value) = ready() {
                return Ok(value);
            }
            match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    if self.monitor.wait_until(&mut guard, deadline).timed_out() {
                        if let Some(signal) = guard.as_ref() {
                            return Err(PipelineError::Cancelled(signal.clone()));
                        }
                        return ready().ok_or(PipelineError::Timeout(timeout));
                    }
                }
                _ => self.monitor.wait(&mut guard),
            }
        }
    }
}

impl Default for CancellationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSlot {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CancellationSlot")
            .field("signal", &self.signal())
            .finish()
    }
}
