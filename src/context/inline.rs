//! An [`ExecutionContext`] running every task on the scheduling thread.
//!
//! [`InlineContext`] has no queue: `schedule` and `schedule_before` run the
//! task before returning. A blocking call therefore never waits for another
//! thread, and [`ExecutionContext::is_current`] is always `false` since a
//! nested wait is served synchronously as well.
//!
//! It is meant for deterministic tests and for builds without the `runtime`
//! feature.
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::context::inline::InlineContext;
//! use lazy_collections::list::FutureList;
//!
//! let context = InlineContext::new().into_shared();
//! let list = FutureList::of(context, vec![3, 1, 2]).sorted();
//! assert_eq!(list.get().unwrap(), vec![1, 2, 3]);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ExecutionContext, SharedContext, Task, TaskId};

/// Runs tasks immediately on the calling thread.
#[derive(Debug, Default)]
pub struct InlineContext {
    scheduled: AtomicUsize,
}

impl InlineContext {
    /// Creates a new inline context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scheduled: AtomicUsize::new(0),
        }
    }

    /// Wraps the context into a shared handle.
    #[must_use]
    pub fn into_shared(self) -> SharedContext {
        Arc::new(self)
    }

    /// Number of tasks run so far.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.load(Ordering::Acquire)
    }

    fn run(&self, task: Box<dyn Task>) {
        self.scheduled.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(task_id = %task.task_id(), weight = task.weight(), "running inline task");
        task.run();
    }
}

impl ExecutionContext for InlineContext {
    fn schedule(&self, task: Box<dyn Task>) {
        self.run(task);
    }

    fn schedule_before(&self, task: Box<dyn Task>) {
        self.run(task);
    }

    fn is_current(&self) -> bool {
        false
    }

    fn interrupt_task(&self, _task_id: &TaskId) -> bool {
        false
    }
}
