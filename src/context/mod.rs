//! Execution contexts: where materialization work actually runs.
//!
//! The pipeline core never spawns threads. Every unit of work is wrapped into a
//! [`Task`] and handed to an [`ExecutionContext`], which decides when and on
//! which thread to run it. The core only relies on four capabilities:
//!
//! - [`ExecutionContext::schedule`]: run a task after the already queued ones
//! - [`ExecutionContext::schedule_before`]: run a task before the queued ones
//!   (used by cancellation)
//! - [`ExecutionContext::is_current`]: whether the calling thread is already
//!   running inside the context (used to detect deadlocks)
//! - [`ExecutionContext::interrupt_task`]: flag the running task with a given id
//!
//! A tokio backed implementation is provided by [`runtime::RuntimeContext`]
//! when the `runtime` feature is enabled; [`inline::InlineContext`] runs
//! tasks on the scheduling thread.

pub mod inline;
#[cfg(feature = "runtime")]
pub mod runtime;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique façade identities.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// TaskId
// =============================================================================

/// Stable identity of a façade, used to route and interrupt scheduled work.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Allocates a fresh id with the given prefix, e.g. `list-17`.
    #[must_use]
    pub fn next(prefix: &str) -> Self {
        let sequence = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("{prefix}-{sequence:x}")))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

// =============================================================================
// Task
// =============================================================================

/// A unit of work submitted to an [`ExecutionContext`].
pub trait Task: Send {
    /// The id of the façade the work belongs to.
    fn task_id(&self) -> &TaskId;

    /// A non-negative cost estimate. Only used as a scheduling hint.
    fn weight(&self) -> usize;

    /// Runs the task, consuming it.
    fn run(self: Box<Self>);
}

/// A [`Task`] built from a closure.
///
/// # Examples
///
/// ```rust
/// use lazy_collections::context::{ContextTask, Task, TaskId};
///
/// let task = ContextTask::new(TaskId::from("list-1"), 3, || println!("running"));
/// assert_eq!(task.weight(), 3);
/// Box::new(task).run();
/// ```
pub struct ContextTask<F> {
    task_id: TaskId,
    weight: usize,
    body: F,
}

impl<F> ContextTask<F>
where
    F: FnOnce() + Send,
{
    /// Creates a new task.
    pub const fn new(task_id: TaskId, weight: usize, body: F) -> Self {
        Self {
            task_id,
            weight,
            body,
        }
    }
}

impl<F> Task for ContextTask<F>
where
    F: FnOnce() + Send,
{
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    fn weight(&self) -> usize {
        self.weight
    }

    fn run(self: Box<Self>) {
        (self.body)();
    }
}

impl<F> fmt::Debug for ContextTask<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ContextTask")
            .field("task_id", &self.task_id)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ExecutionContext
// =============================================================================

/// The task scheduler abstraction the pipeline core is built upon.
///
/// Implementations decide the threading policy. Tasks sharing the same
/// [`TaskId`] are logically sequential continuations of one pipeline.
pub trait ExecutionContext: Send + Sync {
    /// Schedules a task after the already pending ones.
    fn schedule(&self, task: Box<dyn Task>);

    /// Schedules a task before the already pending ones.
    fn schedule_before(&self, task: Box<dyn Task>);

    /// Returns `true` if the calling thread is running a task of this context.
    fn is_current(&self) -> bool;

    /// Requests interruption of the running task with the given id.
    ///
    /// Returns `true` if a matching task was found.
    fn interrupt_task(&self, task_id: &TaskId) -> bool;
}

/// Shared handle to an execution context.
pub type SharedContext = Arc<dyn ExecutionContext>;

/// Returns `true` if both handles point at the same context instance.
pub(crate) fn is_same_context(left: &SharedContext, right: &SharedContext) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}
