//! Errors delivered through the consumer protocol and raised by blocking calls.
//!
//! Every failure inside a pipeline travels as a [`PipelineError`] value: user
//! functions that panic are captured at the invocation boundary and turned into
//! [`PipelineError::Failed`], cancellation is carried by a
//! [`CancellationSignal`], and the blocking adapters add [`PipelineError::Timeout`]
//! and [`PipelineError::Deadlock`] for conditions that only exist on the
//! synchronous side.
//!
//! `PipelineError` is cheap to clone so that a memoized terminal error can be
//! handed to every consumer that asks for the same result.
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::error::{Failure, PipelineError};
//!
//! let error = PipelineError::Failed(Failure::new("boom"));
//! assert!(error.is_failed());
//! assert_eq!(error.to_string(), "pipeline operation failed: boom");
//! ```

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use crate::context::TaskId;

/// Convenience alias used across the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

// =============================================================================
// CancellationSignal
// =============================================================================

/// The value stored into a cancellation slot when a pipeline is cancelled.
///
/// It records which façade accepted the cancellation and whether the caller
/// asked for the in-flight task to be interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationSignal {
    task_id: TaskId,
    may_interrupt: bool,
}

impl CancellationSignal {
    /// Creates a new signal raised by the given task.
    #[must_use]
    pub const fn new(task_id: TaskId, may_interrupt: bool) -> Self {
        Self {
            task_id,
            may_interrupt,
        }
    }

    /// Returns the id of the façade that was cancelled.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Returns `true` if interruption of the running task was requested.
    #[must_use]
    pub const fn may_interrupt(&self) -> bool {
        self.may_interrupt
    }
}

impl fmt::Display for CancellationSignal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "pipeline {} was cancelled", self.task_id)
    }
}

// =============================================================================
// Failure
// =============================================================================

/// A failure raised by a user supplied function.
///
/// The failure keeps a rendered message and, when it was built from an error
/// value, the original error as its source.
#[derive(Clone)]
pub struct Failure {
    message: Arc<str>,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl Failure {
    /// Creates a failure from a plain message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
            source: None,
        }
    }

    /// Creates a failure wrapping an error value.
    #[must_use]
    pub fn from_error<Err>(error: Err) -> Self
    where
        Err: Error + Send + Sync + 'static,
    {
        Self {
            message: Arc::from(error.to_string()),
            source: Some(Arc::new(error)),
        }
    }

    /// Builds a failure out of a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "user function panicked".to_string());
        Self::new(message)
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Failure")
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.message)
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for Failure {}

// =============================================================================
// PipelineError
// =============================================================================

/// Errors produced while materializing a pipeline or waiting for its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The pipeline was cancelled before a result could be delivered.
    Cancelled(CancellationSignal),

    /// A user supplied function failed.
    Failed(Failure),

    /// An index outside of `[0, size)` was requested.
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The size of the sequence.
        size: usize,
    },

    /// An element was requested from an exhausted or empty sequence.
    NoSuchElement,

    /// A blocking wait elapsed before the result was available.
    ///
    /// The underlying materialization keeps running in the background.
    Timeout(Duration),

    /// A blocking call was issued from inside the execution context that owns
    /// the pending materialization.
    Deadlock,
}

impl PipelineError {
    /// Returns `true` for [`PipelineError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` for [`PipelineError::Failed`].
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns `true` for the bounds related variants.
    #[must_use]
    pub const fn is_out_of_bounds(&self) -> bool {
        matches!(self, Self::IndexOutOfBounds { .. } | Self::NoSuchElement)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(signal) => write!(formatter, "{signal}"),
            Self::Failed(failure) => write!(formatter, "pipeline operation failed: {failure}"),
            Self::IndexOutOfBounds { index, size } => {
                write!(formatter, "index {index} is out of bounds for size {size}")
            }
            Self::NoSuchElement => write!(formatter, "no such element"),
            Self::Timeout(timeout) => {
                write!(formatter, "timed out after {timeout:?} waiting for the result")
            }
            Self::Deadlock => write!(
                formatter,
                "deadlock detected: cannot wait for a pending result from inside its own execution context"
            ),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Failed(failure) => failure
                .source
                .as_deref()
                .map(|source| source as &(dyn Error + 'static)),
            _ => None,
        }
    }
}

impl From<CancellationSignal> for PipelineError {
    fn from(signal: CancellationSignal) -> Self {
        Self::Cancelled(signal)
    }
}

impl From<Failure> for PipelineError {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

/// Runs a user function, turning a panic into [`PipelineError::Failed`].
pub(crate) fn guard<T>(function: impl FnOnce() -> T) -> PipelineResult<T> {
    catch_unwind(AssertUnwindSafe(function))
        .map_err(|payload| PipelineError::Failed(Failure::from_panic(payload)))
}
