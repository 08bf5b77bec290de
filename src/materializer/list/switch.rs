//! Bridging a materializer owned by another execution context.
//!
//! Every call into the wrapped materializer is scheduled on its own
//! context, and every result is scheduled back on the local one, so neither
//! side ever runs code on a thread of the other.

use std::fmt;
use std::sync::Arc;

use super::{serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, consumer, deliver, deliver_lookup,
    indexed_consumer,
};
use crate::context::{ContextTask, SharedContext, TaskId};
use crate::error::CancellationSignal;
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// The two sides of a context switch.
#[derive(Clone)]
struct Bridge {
    local: SharedContext,
    local_task: TaskId,
    foreign: SharedContext,
    foreign_task: TaskId,
}

impl Bridge {
    /// Runs `call` on the foreign context.
    fn outbound(&self, weight: usize, call: impl FnOnce() + Send + 'static) {
        self.foreign.schedule(Box::new(ContextTask::new(
            self.foreign_task.clone(),
            weight,
            call,
        )));
    }

    /// Runs `delivery` back on the local context.
    fn inbound(&self, delivery: impl FnOnce() + Send + 'static) {
        self.local
            .schedule(Box::new(ContextTask::new(self.local_task.clone(), 1, delivery)));
    }

    /// Wraps a consumer so that its result is delivered on the local context.
    fn returning<T: Send + 'static>(&self, target: BoxConsumer<T>) -> BoxConsumer<T> {
        let bridge = self.clone();
        consumer(move |result| bridge.inbound(move || deliver(target, result)))
    }
}

/// Exposes a materializer of a foreign context as a local one.
///
/// Cancelling the switch only affects the local side: the wrapped
/// materializer belongs to another pipeline.
pub struct SwitchListMaterializer<E> {
    wrapped: SharedList<E>,
    bridge: Bridge,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> SwitchListMaterializer<E> {
    /// Wraps `wrapped`, owned by `foreign`, for use from `local`.
    pub fn new(
        wrapped: SharedList<E>,
        local: SharedContext,
        local_task: TaskId,
        foreign: SharedContext,
        foreign_task: TaskId,
    ) -> Self {
        Self {
            wrapped,
            bridge: Bridge {
                local,
                local_task,
                foreign,
                foreign_task,
            },
            memo: Arc::new(Memo::new()),
        }
    }

    fn materialize(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let wrapped = Arc::clone(&self.wrapped);
            let returning = self.bridge.returning(self.memo.completer());
            self.bridge.outbound(self.wrapped.weight_elements(), move || {
                wrapped.materialize_elements(returning);
            });
        });
    }
}

impl<E: Element> ListMaterializer<E> for SwitchListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        self.wrapped.known_size()
    }

    fn is_materialized_at_once(&self) -> bool {
        self.memo.status() == Status::Succeeded
    }

    fn status(&self) -> Status {
        self.memo.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        self.memo.cancel(signal);
    }

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        if let Some(error) = self.memo.error() {
            return target.error(error);
        }
        let wrapped = Arc::clone(&self.wrapped);
        let bridge = self.bridge.clone();
        self.bridge.outbound(self.wrapped.weight_element(), move || {
            wrapped.materialize_element(
                index,
                indexed_consumer(move |result| {
                    bridge.inbound(move || deliver_lookup(target, result));
                }),
            );
        });
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.materialize(target);
    }

    fn materialize_has_element(&self, index: usize, target: BoxConsumer<bool>) {
        if let Some(error) = self.memo.error() {
            return target.error(error);
        }
        let wrapped = Arc::clone(&self.wrapped);
        let returning = self.bridge.returning(target);
        self.bridge.outbound(self.wrapped.weight_has_element(), move || {
            wrapped.materialize_has_element(index, returning);
        });
    }

    fn materialize_size(&self, target: BoxConsumer<usize>) {
        if let Some(error) = self.memo.error() {
            return target.error(error);
        }
        let wrapped = Arc::clone(&self.wrapped);
        let returning = self.bridge.returning(target);
        self.bridge.outbound(self.wrapped.weight_size(), move || {
            wrapped.materialize_size(returning);
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize(serve_next_while(index, predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.wrapped.weight_element().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.wrapped.weight_elements().saturating_add(1)
    }
}

impl<E> fmt::Debug for SwitchListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SwitchListMaterializer")
            .field("local_task", &self.bridge.local_task)
            .field("foreign_task", &self.bridge.foreign_task)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "runtime"))]
mod tests {
    use super::*;
    use crate::context::runtime::RuntimeContext;
    use crate::consumer::Lookup;
    use crate::materializer::list::ResidentListMaterializer;
    use rstest::rstest;
    use std::sync::mpsc;
    use std::time::Duration;

    #[rstest]
    fn results_come_back_on_the_local_context() {
        let local = RuntimeContext::new().into_shared();
        let foreign = RuntimeContext::new().into_shared();
        let switch = SwitchListMaterializer::new(
            Arc::new(ResidentListMaterializer::new(vec![1, 2, 3])),
            Arc::clone(&local),
            TaskId::from("local"),
            Arc::clone(&foreign),
            TaskId::from("foreign"),
        );

        let (sender, receiver) = mpsc::channel();
        let observer = Arc::clone(&local);
        switch.materialize_element(
            1,
            indexed_consumer(move |result| {
                sender.send((observer.is_current(), result)).unwrap();
            }),
        );
        let (on_local, result) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(on_local);
        assert_eq!(
            result,
            Ok(Lookup::Found {
                size: Some(3),
                index: 1,
                element: 2
            })
        );
    }

    #[rstest]
    fn pending_until_the_bridged_result_arrives() {
        let local = RuntimeContext::new().into_shared();
        let foreign = RuntimeContext::new().into_shared();
        let wrapped: SharedList<i32> = Arc::new(ResidentListMaterializer::new(vec![1, 2, 3]));
        let switch = SwitchListMaterializer::new(
            Arc::clone(&wrapped),
            local,
            TaskId::from("local"),
            foreign,
            TaskId::from("foreign"),
        );
        assert!(wrapped.is_done());
        assert_eq!(switch.status(), Status::Pending);
        assert!(!switch.is_materialized_at_once());

        let (sender, receiver) = mpsc::channel();
        switch.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        let elements = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(elements.map(|elements| elements.to_vec()), Ok(vec![1, 2, 3]));
        assert!(switch.is_succeeded());
    }

    #[rstest]
    fn cancellation_stays_local() {
        let context = RuntimeContext::new().into_shared();
        let wrapped: SharedList<i32> = Arc::new(ResidentListMaterializer::new(vec![1]));
        let switch = SwitchListMaterializer::new(
            Arc::clone(&wrapped),
            Arc::clone(&context),
            TaskId::from("local"),
            context,
            TaskId::from("foreign"),
        );
        switch.materialize_cancel(&CancellationSignal::new(TaskId::from("local"), false));
        assert!(switch.is_cancelled());
        assert!(wrapped.is_succeeded());
    }
}
