//! At-most-once memoization of a materializer result.
//!
//! [`Memo`] is the state machine shared by every materializer that caches a
//! full result:
//!
//! ```text
//! Immaterial --subscribe--> Materializing --complete--> Succeeded | Failed
//!      |                         |
//!      +---------cancel----------+--------------------> Cancelled
//! ```
//!
//! The first subscriber moves the memo to `Materializing` and is told to start
//! the computation; every later subscriber joins the waiters and is served
//! with the same outcome. Terminal states are sticky: a late `complete` after a
//! cancellation is dropped.
//!
//! The lock is never held while a consumer runs.

use std::fmt;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::Status;
use crate::consumer::{BoxConsumer, consumer, deliver};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};

/// Most memos are waited on by one or two consumers.
type Waiters<T> = SmallVec<[BoxConsumer<T>; 2]>;

enum MemoState<T> {
    Immaterial,
    Materializing(Waiters<T>),
    Succeeded(T),
    Failed(PipelineError),
    Cancelled(PipelineError),
}

impl<T> MemoState<T> {
    fn terminal(result: PipelineResult<T>) -> Self {
        match result {
            Ok(value) => Self::Succeeded(value),
            Err(error @ PipelineError::Cancelled(_)) => Self::Cancelled(error),
            Err(error) => Self::Failed(error),
        }
    }

    const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled(_)
        )
    }
}

/// A memoized, fan-out result cell.
pub(crate) struct Memo<T> {
    state: Mutex<MemoState<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an immaterial memo.
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MemoState::Immaterial),
        }
    }

    /// Creates a memo that already holds a value.
    pub(crate) fn succeeded(value: T) -> Self {
        Self {
            state: Mutex::new(MemoState::Succeeded(value)),
        }
    }

    /// Returns the externally observable status.
    pub(crate) fn status(&self) -> Status {
        match &*self.state.lock() {
            MemoState::Immaterial | MemoState::Materializing(_) => Status::Pending,
            MemoState::Succeeded(_) => Status::Succeeded,
            MemoState::Failed(_) => Status::Failed,
            MemoState::Cancelled(_) => Status::Cancelled,
        }
    }

    /// Returns the cached value, if succeeded.
    pub(crate) fn value(&self) -> Option<T> {
        match &*self.state.lock() {
            MemoState::Succeeded(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the cached error, if failed or cancelled.
    pub(crate) fn error(&self) -> Option<PipelineError> {
        match &*self.state.lock() {
            MemoState::Failed(error) | MemoState::Cancelled(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns the cached outcome, if terminal.
    pub(crate) fn outcome(&self) -> Option<PipelineResult<T>> {
        match &*self.state.lock() {
            MemoState::Succeeded(value) => Some(Ok(value.clone())),
            MemoState::Failed(error) | MemoState::Cancelled(error) => Some(Err(error.clone())),
            MemoState::Immaterial | MemoState::Materializing(_) => None,
        }
    }

    /// Registers a consumer. Returns `true` if the caller must start the
    /// computation, which it must eventually finish with [`Memo::complete`].
    #[must_use]
    pub(crate) fn subscribe(&self, consumer: BoxConsumer<T>) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            MemoState::Succeeded(value) => {
                let value = value.clone();
                drop(state);
                consumer.accept(value);
                false
            }
            MemoState::Failed(error) | MemoState::Cancelled(error) => {
                let error = error.clone();
                drop(state);
                consumer.error(error);
                false
            }
            MemoState::Materializing(waiters) => {
                waiters.push(consumer);
                false
            }
            MemoState::Immaterial => {
                let mut waiters = Waiters::new();
                waiters.push(consumer);
                *state = MemoState::Materializing(waiters);
                true
            }
        }
    }

    /// Subscribes and runs `start` if this is the first request.
    pub(crate) fn materialize(&self, consumer: BoxConsumer<T>, start: impl FnOnce()) {
        if self.subscribe(consumer) {
            tracing::trace!("memo materializing");
            start();
        }
    }

    /// Stores the terminal outcome and serves the waiters.
    ///
    /// Ignored if the memo is already terminal.
    pub(crate) fn complete(&self, result: PipelineResult<T>) {
        let waiters = {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            match std::mem::replace(&mut *state, MemoState::terminal(result.clone())) {
                MemoState::Materializing(waiters) => waiters,
                _ => Waiters::new(),
            }
        };
        for waiter in waiters {
            deliver(waiter, result.clone());
        }
    }

    /// Moves the memo to cancelled unless it is already terminal.
    ///
    /// Returns `true` if the state changed.
    pub(crate) fn cancel(&self, signal: &CancellationSignal) -> bool {
        let error = PipelineError::Cancelled(signal.clone());
        let waiters = {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            match std::mem::replace(&mut *state, MemoState::Cancelled(error.clone())) {
                MemoState::Materializing(waiters) => waiters,
                _ => Waiters::new(),
            }
        };
        tracing::debug!(waiters = waiters.len(), "memo cancelled");
        for waiter in waiters {
            waiter.error(error.clone());
        }
        true
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns a consumer that completes this memo.
    pub(crate) fn completer(self: &std::sync::Arc<Self>) -> BoxConsumer<T> {
        let memo = std::sync::Arc::clone(self);
        consumer(move |result| memo.complete(result))
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            MemoState::Immaterial => "Immaterial",
            MemoState::Materializing(_) => "Materializing",
            MemoState::Succeeded(_) => "Succeeded",
            MemoState::Failed(_) => "Failed",
            MemoState::Cancelled(_) => "Cancelled",
        };
        formatter.debug_struct("Memo").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskId;
    use crate::error::Failure;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::mpsc;

    fn recorder<T: Send + 'static>() -> (BoxConsumer<T>, mpsc::Receiver<PipelineResult<T>>) {
        let (sender, receiver) = mpsc::channel();
        (consumer(move |result| sender.send(result).unwrap()), receiver)
    }

    #[rstest]
    fn first_subscriber_starts_and_others_join() {
        let memo = Memo::<i32>::new();
        let (first, first_results) = recorder();
        let (second, second_results) = recorder();

        assert!(memo.subscribe(first));
        assert!(!memo.subscribe(second));
        assert_eq!(memo.status(), Status::Pending);

        memo.complete(Ok(5));
        assert_eq!(first_results.recv().unwrap(), Ok(5));
        assert_eq!(second_results.recv().unwrap(), Ok(5));
        assert_eq!(memo.status(), Status::Succeeded);
    }

    #[rstest]
    fn late_subscriber_gets_cached_error() {
        let memo = Memo::<i32>::new();
        memo.complete(Err(PipelineError::Failed(Failure::new("x"))));
        let (late, results) = recorder();
        assert!(!memo.subscribe(late));
        assert!(results.recv().unwrap().unwrap_err().is_failed());
        assert_eq!(memo.status(), Status::Failed);
    }

    #[rstest]
    fn cancel_wins_over_late_completion() {
        let memo = Arc::new(Memo::<i32>::new());
        let (waiter, results) = recorder();
        assert!(memo.subscribe(waiter));

        let signal = CancellationSignal::new(TaskId::from("t"), false);
        assert!(memo.cancel(&signal));
        assert!(!memo.cancel(&signal));
        memo.completer().accept(9);

        assert!(results.recv().unwrap().unwrap_err().is_cancelled());
        assert_eq!(memo.status(), Status::Cancelled);
        assert!(memo.value().is_none());
    }

    #[rstest]
    fn succeeded_memo_serves_immediately() {
        let memo = Memo::succeeded(vec![1, 2]);
        assert_eq!(memo.outcome(), Some(Ok(vec![1, 2])));
        let (late, results) = recorder();
        memo.materialize(late, || panic!("must not start"));
        assert_eq!(results.recv().unwrap(), Ok(vec![1, 2]));
    }
}
