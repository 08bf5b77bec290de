//! A tokio backed [`ExecutionContext`].
//!
//! [`RuntimeContext`] is a serial task queue. Scheduled tasks are appended (or
//! prepended, for [`ExecutionContext::schedule_before`]) to the queue and a
//! single drainer runs them in order on the tokio blocking pool. The context
//! does not own any thread: it borrows the blocking pool of a runtime, by
//! default the lazily initialized global one.
//!
//! # Design
//!
//! 1. **Global Runtime**: a multi-thread runtime created on first use and
//!    shared by every context that is not given an explicit handle.
//!
//! 2. **Serial Drain**: at most one drainer runs per context, so tasks of a
//!    context never run concurrently with each other. After `batch_size` tasks
//!    the drainer hands its blocking thread back and re-spawns itself.
//!
//! 3. **Current Marker**: while draining, a thread-local marker records the
//!    context id, which answers [`ExecutionContext::is_current`].
//!
//! 4. **Cooperative Interruption**: [`ExecutionContext::interrupt_task`] flags
//!    the running task. User functions can poll [`is_interrupted`] and bail out.
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::context::runtime::RuntimeContext;
//! use lazy_collections::list::FutureList;
//!
//! let context = RuntimeContext::new().into_shared();
//! let list = FutureList::of(context, vec![1, 2, 3]).map(|value| value * 2);
//! assert_eq!(list.get().unwrap(), vec![2, 4, 6]);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use super::{ExecutionContext, SharedContext, Task, TaskId};

/// Default number of tasks a drainer runs before yielding its thread.
const DEFAULT_BATCH_SIZE: usize = 64;

/// Source of context identities (0 means "no context").
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Global Runtime
// =============================================================================

/// Global tokio runtime initialized lazily on first access.
///
/// Worker threads equal the number of CPU cores. The runtime has static
/// lifetime and is never dropped.
static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("lazy-collections")
        .enable_all()
        .build()
        .expect("Failed to create global tokio runtime")
});

/// Returns a reference to the global runtime.
#[inline]
#[must_use]
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}

thread_local! {
    /// Thread-local cached handle to the global runtime.
    static CACHED_HANDLE: RefCell<Option<Handle>> = const { RefCell::new(None) };

    /// Id of the context whose drainer runs on this thread.
    static CURRENT_CONTEXT: Cell<u64> = const { Cell::new(0) };

    /// Interruption flag of the task running on this thread.
    static CURRENT_INTERRUPT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Returns a handle to the current runtime, or to the global one when the
/// caller is not inside a runtime.
#[must_use]
pub fn handle() -> Handle {
    if let Ok(current_handle) = Handle::try_current() {
        return current_handle;
    }

    CACHED_HANDLE.with(|cached| {
        cached
            .borrow_mut()
            .get_or_insert_with(|| global().handle().clone())
            .clone()
    })
}

/// Returns `true` if the task running on this thread was asked to stop.
///
/// Long running user functions may poll this flag to honour
/// `cancel(true)` requests.
#[must_use]
pub fn is_interrupted() -> bool {
    CURRENT_INTERRUPT.with(|flag| {
        flag.borrow()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    })
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of a [`RuntimeContext`].
///
/// # Examples
///
/// ```rust
/// use lazy_collections::context::runtime::{RuntimeContext, RuntimeContextConfig};
///
/// let config = RuntimeContextConfig::default()
///     .with_name("io")
///     .with_batch_size(16);
/// let context = RuntimeContext::with_config(config);
/// assert_eq!(context.name(), "io");
/// ```
#[derive(Clone)]
pub struct RuntimeContextConfig {
    name: String,
    batch_size: usize,
    handle: Option<Handle>,
}

impl RuntimeContextConfig {
    /// Sets the name used in log events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how many tasks a drainer runs before yielding. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs the context on the given runtime instead of the global one.
    #[must_use]
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl Default for RuntimeContextConfig {
    fn default() -> Self {
        Self {
            name: "runtime".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            handle: None,
        }
    }
}

impl fmt::Debug for RuntimeContextConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RuntimeContextConfig")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

// =============================================================================
// RuntimeContext
// =============================================================================

/// Pending and running work of a context.
struct QueueState {
    tasks: VecDeque<Box<dyn Task>>,
    draining: bool,
    running: Option<(TaskId, Arc<AtomicBool>)>,
}

struct Inner {
    id: u64,
    name: String,
    batch_size: usize,
    handle: Handle,
    scheduled: AtomicUsize,
    state: Mutex<QueueState>,
}

/// A serial execution context draining its queue on a tokio blocking pool.
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<Inner>,
}

impl RuntimeContext {
    /// Creates a context on the global runtime with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeContextConfig::default())
    }

    /// Creates a context from an explicit configuration.
    #[must_use]
    pub fn with_config(config: RuntimeContextConfig) -> Self {
        let handle = config.handle.unwrap_or_else(handle);
        Self {
            inner: Arc::new(Inner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                name: config.name,
                batch_size: config.batch_size.max(1),
                handle,
                scheduled: AtomicUsize::new(0),
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    draining: false,
                    running: None,
                }),
            }),
        }
    }

    /// Wraps the context into the shared handle façades expect.
    #[must_use]
    pub fn into_shared(self) -> SharedContext {
        Arc::new(self)
    }

    /// Returns the configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns how many tasks were scheduled on this context so far.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.inner.scheduled.load(Ordering::Acquire)
    }

    /// Returns how many tasks are waiting in the queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    fn enqueue(&self, task: Box<dyn Task>, front: bool) {
        self.inner.scheduled.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            context = %self.inner.name,
            task_id = %task.task_id(),
            weight = task.weight(),
            front,
            "scheduling task"
        );
        let spawn = {
            let mut state = self.inner.state.lock();
            if front {
                state.tasks.push_front(task);
            } else {
                state.tasks.push_back(task);
            }
            !std::mem::replace(&mut state.draining, true)
        };
        if spawn {
            Inner::spawn_drainer(&self.inner);
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RuntimeContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("batch_size", &self.inner.batch_size)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext for RuntimeContext {
    fn schedule(&self, task: Box<dyn Task>) {
        self.enqueue(task, false);
    }

    fn schedule_before(&self, task: Box<dyn Task>) {
        self.enqueue(task, true);
    }

    fn is_current(&self) -> bool {
        CURRENT_CONTEXT.with(Cell::get) == self.inner.id
    }

    fn interrupt_task(&self, task_id: &TaskId) -> bool {
        let state = self.inner.state.lock();
        match &state.running {
            Some((running, flag)) if running == task_id => {
                flag.store(true, Ordering::Release);
                tracing::debug!(context = %self.inner.name, task_id = %task_id, "task interrupted");
                true
            }
            _ => false,
        }
    }
}

/// Marks the current thread as draining a context until dropped.
struct CurrentGuard {
    previous: u64,
}

impl CurrentGuard {
    fn enter(id: u64) -> Self {
        Self {
            previous: CURRENT_CONTEXT.with(|current| current.replace(id)),
        }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|current| current.set(self.previous));
    }
}

impl Inner {
    fn spawn_drainer(inner: &Arc<Self>) {
        let inner = Arc::clone(inner);
        drop(inner.handle.clone().spawn_blocking(move || inner.drain()));
    }

    fn drain(self: Arc<Self>) {
        {
            let _guard = CurrentGuard::enter(self.id);
            for _ in 0..self.batch_size {
                let (task, interrupt) = {
                    let mut state = self.state.lock();
                    let Some(task) = state.tasks.pop_front() else {
                        state.draining = false;
                        state.running = None;
                        return;
                    };
                    let interrupt = Arc::new(AtomicBool::new(false));
                    state.running = Some((task.task_id().clone(), Arc::clone(&interrupt)));
                    (task, interrupt)
                };

                let task_id = task.task_id().clone();
                CURRENT_INTERRUPT.with(|flag| *flag.borrow_mut() = Some(interrupt));
                if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                    tracing::warn!(context = %self.name, task_id = %task_id, "scheduled task panicked");
                }
                CURRENT_INTERRUPT.with(|flag| *flag.borrow_mut() = None);
                self.state.lock().running = None;
            }
        }
        tracing::debug!(context = %self.name, "drainer yielding after a full batch");
        Self::spawn_drainer(&self);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
