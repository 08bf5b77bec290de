//! Bridging the consumer protocol to synchronous callers.
//!
//! Every façade owns a [`Binding`]: the execution context its work runs on,
//! the cancellation slot it shares with the façades of the same fluent
//! chain, and its own task id. The binding knows how to
//!
//! - block the calling thread until a consumer is served ([`Binding::wait`]),
//! - hand a request to the context without blocking ([`Binding::submit`]),
//! - accept a cancellation ([`Binding::cancel`]).
//!
//! A blocking wait issued from a thread that is already running inside the
//! context fails with [`PipelineError::Deadlock`] unless the result is
//! already cached: the context could never run the task the caller waits
//! for.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::CancellationSlot;
use crate::consumer::{BoxConsumer, consumer, deliver};
use crate::context::{ContextTask, SharedContext, TaskId, is_same_context};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};

/// Where and under which identity a façade runs its work.
#[derive(Clone)]
pub(crate) struct Binding {
    context: SharedContext,
    slot: Arc<CancellationSlot>,
    task_id: TaskId,
}

impl Binding {
    /// A fresh root binding with its own cancellation slot.
    pub(crate) fn root(context: SharedContext, prefix: &str) -> Self {
        Self {
            context,
            slot: CancellationSlot::shared(),
            task_id: TaskId::next(prefix),
        }
    }

    /// A binding for a façade derived from this one: same context, same slot.
    pub(crate) fn derive(&self, prefix: &str) -> Self {
        Self {
            context: Arc::clone(&self.context),
            slot: Arc::clone(&self.slot),
            task_id: TaskId::next(prefix),
        }
    }

    /// A binding on the same context with a fresh slot.
    pub(crate) fn detach(&self, prefix: &str) -> Self {
        Self::root(Arc::clone(&self.context), prefix)
    }

    pub(crate) const fn context(&self) -> &SharedContext {
        &self.context
    }

    pub(crate) const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.slot.is_set()
    }

    /// Returns `true` if `other` runs on the same context.
    pub(crate) fn shares_context(&self, other: &Self) -> bool {
        is_same_context(&self.context, &other.context)
    }

    /// Blocks until `request` serves its consumer.
    ///
    /// When `is_done` is set the result is cached and `request` runs on the
    /// calling thread; otherwise it is scheduled on the context with the
    /// given weight.
    pub(crate) fn wait<T, R>(
        &self,
        is_done: bool,
        weight: usize,
        timeout: Option<Duration>,
        request: R,
    ) -> PipelineResult<T>
    where
        T: Send + 'static,
        R: FnOnce(BoxConsumer<T>) + Send + 'static,
    {
        if let Some(error) = self.slot.error() {
            return Err(error);
        }
        let cell = Arc::new(Mutex::new(None));
        let filled = Arc::clone(&cell);
        let slot = Arc::clone(&self.slot);
        let target = consumer(move |result: PipelineResult<T>| {
            *filled.lock() = Some(result);
            slot.notify();
        });

        if is_done {
            request(target);
        } else if self.context.is_current() {
            tracing::warn!(task_id = %self.task_id, "blocking call issued from inside its own execution context");
            return Err(PipelineError::Deadlock);
        } else {
            self.context.schedule(Box::new(ContextTask::new(
                self.task_id.clone(),
                weight,
                move || request(target),
            )));
        }

        self.slot
            .wait_for(|| cell.lock().take(), timeout)
            .and_then(|result| result)
    }

    /// Schedules `request` and serves `target` without blocking.
    ///
    /// A success delivered after the slot was signalled is turned into the
    /// cancellation error.
    pub(crate) fn submit<T, R>(&self, weight: usize, request: R, target: BoxConsumer<T>)
    where
        T: Send + 'static,
        R: FnOnce(BoxConsumer<T>) + Send + 'static,
    {
        let slot = Arc::clone(&self.slot);
        let guarded = consumer(move |result: PipelineResult<T>| match slot.error() {
            Some(error) => target.error(error),
            None => deliver(target, result),
        });
        self.spawn(weight, move |ready| match ready {
            Ok(()) => request(guarded),
            Err(error) => guarded.error(error),
        });
    }

    /// Schedules `work` on the context.
    ///
    /// `work` receives the cancellation error instead of running when the
    /// slot is signalled before it starts.
    pub(crate) fn spawn(
        &self,
        weight: usize,
        work: impl FnOnce(PipelineResult<()>) + Send + 'static,
    ) {
        if let Some(error) = self.slot.error() {
            return work(Err(error));
        }
        let slot = Arc::clone(&self.slot);
        self.context.schedule(Box::new(ContextTask::new(
            self.task_id.clone(),
            weight,
            move || match slot.error() {
                Some(error) => work(Err(error)),
                None => work(Ok(())),
            },
        )));
    }

    /// Accepts a cancellation unless the work is done or another one won.
    ///
    /// On acceptance the running task is optionally interrupted, the
    /// materializer is cancelled by a priority task and every waiter on the
    /// slot is woken.
    pub(crate) fn cancel(
        &self,
        is_done: bool,
        may_interrupt: bool,
        materialize_cancel: impl FnOnce(&CancellationSignal) + Send + 'static,
    ) -> bool {
        if is_done {
            return false;
        }
        let signal = CancellationSignal::new(self.task_id.clone(), may_interrupt);
        if !self.slot.set(signal.clone()) {
            return false;
        }
        tracing::debug!(task_id = %self.task_id, may_interrupt, "cancellation accepted");
        if may_interrupt {
            self.context.interrupt_task(&self.task_id);
        }
        self.context.schedule_before(Box::new(ContextTask::new(
            self.task_id.clone(),
            1,
            move || materialize_cancel(&signal),
        )));
        true
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Binding")
            .field("task_id", &self.task_id)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "runtime"))]
mod tests {
    use super::*;
    use crate::context::runtime::RuntimeContext;
    use rstest::rstest;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn binding() -> Binding {
        Binding::root(RuntimeContext::new().into_shared(), "test")
    }

    #[rstest]
    fn wait_schedules_and_returns_the_value() {
        let binding = binding();
        let result = binding.wait(false, 1, Some(WAIT), |target: BoxConsumer<i32>| {
            target.accept(5);
        });
        assert_eq!(result, Ok(5));
    }

    #[rstest]
    fn done_requests_run_on_the_caller() {
        let binding = binding();
        let caller = std::thread::current().id();
        let result = binding.wait(true, 1, None, move |target: BoxConsumer<bool>| {
            target.accept(std::thread::current().id() == caller);
        });
        assert_eq!(result, Ok(true));
    }

    #[rstest]
    fn waiting_inside_the_context_is_a_deadlock() {
        let binding = binding();
        let inner = binding.clone();
        let (sender, receiver) = mpsc::channel();
        binding.context().schedule(Box::new(ContextTask::new(TaskId::from("t"), 1, move || {
            let result = inner.wait(false, 1, None, |target: BoxConsumer<i32>| target.accept(1));
            sender.send(result).unwrap();
        })));
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Err(PipelineError::Deadlock));
    }

    #[rstest]
    fn wait_times_out_on_silence() {
        let binding = binding();
        let timeout = Duration::from_millis(30);
        let result = binding.wait(false, 1, Some(timeout), |target: BoxConsumer<i32>| drop(target));
        assert_eq!(result, Err(PipelineError::Timeout(timeout)));
    }

    #[rstest]
    fn cancel_wakes_waiters_and_wins_once() {
        let binding = binding();
        let waiter = {
            let binding = binding.clone();
            std::thread::spawn(move || {
                binding.wait(false, 1, None, |target: BoxConsumer<i32>| drop(target))
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(binding.cancel(false, true, |_| {}));
        assert!(!binding.cancel(false, true, |_| {}));
        assert!(waiter.join().unwrap().unwrap_err().is_cancelled());
        assert!(binding.is_cancelled());
    }

    #[rstest]
    fn submit_turns_late_success_into_cancellation() {
        let binding = binding();
        let (sender, receiver) = mpsc::channel();
        let (gate_sender, gate) = mpsc::channel::<()>();
        let canceller = binding.clone();
        binding.submit(
            1,
            move |target: BoxConsumer<i32>| {
                gate.recv().unwrap();
                target.accept(3);
            },
            consumer(move |result| sender.send(result).unwrap()),
        );
        canceller.cancel(false, false, |_| {});
        let _ = gate_sender.send(());
        assert!(receiver.recv_timeout(WAIT).unwrap().unwrap_err().is_cancelled());
    }

    #[rstest]
    fn derived_bindings_share_the_slot() {
        let root = binding();
        let derived = root.derive("child");
        let detached = root.detach("other");
        assert_ne!(root.task_id(), derived.task_id());
        assert!(root.shares_context(&derived));
        derived.cancel(false, false, |_| {});
        assert!(root.is_cancelled());
        assert!(!detached.is_cancelled());
    }
}
