//! Lazy bulk transformation.
//!
//! [`TransformListMaterializer`] obtains the full result of its upstream,
//! runs a transformation closure over it exactly once and caches the
//! outcome. It is the node picked when the upstream is materialized at once,
//! in which case the transformation runs synchronously on the first request.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate, consumer};
use crate::error::{CancellationSignal, PipelineResult, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

type Source<E> = Box<dyn FnOnce(BoxConsumer<Elements<E>>) + Send>;
type CancelHook = Box<dyn Fn(&CancellationSignal) + Send + Sync>;

/// Runs a bulk transformation over whole upstream results, once.
pub struct TransformListMaterializer<E> {
    known_size: Option<usize>,
    at_once: bool,
    weight: usize,
    source: Mutex<Option<Source<E>>>,
    cancel_upstream: CancelHook,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> TransformListMaterializer<E> {
    /// Transforms the full result of `upstream`.
    ///
    /// `known_size` is the size of the transformed collection when it can be
    /// told from the upstream alone.
    pub fn new<U, F>(upstream: SharedList<U>, known_size: Option<usize>, transform: F) -> Self
    where
        U: Element,
        F: FnOnce(Elements<U>) -> Vec<E> + Send + 'static,
    {
        let at_once = upstream.is_materialized_at_once();
        let weight = upstream.weight_elements().saturating_add(1);
        let pulled = Arc::clone(&upstream);
        let source: Source<E> = Box::new(move |target| {
            pulled.materialize_elements(consumer(move |result: PipelineResult<Elements<U>>| {
                let transformed = result.and_then(|elements| guard(|| transform(elements)));
                match transformed {
                    Ok(elements) => target.accept(Arc::new(elements)),
                    Err(error) => target.error(error),
                }
            }));
        });
        Self {
            known_size,
            at_once,
            weight,
            source: Mutex::new(Some(source)),
            cancel_upstream: Box::new(move |signal| upstream.materialize_cancel(signal)),
            memo: Arc::new(Memo::new()),
        }
    }

    fn materialize(&self, consumer: BoxConsumer<Elements<E>>) {
        self.memo.materialize(consumer, || {
            let source = self.source.lock().take();
            if let Some(source) = source {
                source(self.memo.completer());
            }
        });
    }
}

impl<E: Element> ListMaterializer<E> for TransformListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        self.memo
            .value()
            .map(|elements| elements.len())
            .or(self.known_size)
    }

    fn is_materialized_at_once(&self) -> bool {
        self.at_once || self.memo.status() == Status::Succeeded
    }

    fn status(&self) -> Status {
        self.memo.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        if self.memo.cancel(signal) {
            self.source.lock().take();
            (self.cancel_upstream)(signal);
        }
    }

    fn materialize_element(&self, index: usize, consumer: BoxIndexedConsumer<E>) {
        self.materialize(serve_element(index, consumer));
    }

    fn materialize_elements(&self, consumer: BoxConsumer<Elements<E>>) {
        self.materialize(consumer);
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize(serve_next_while(index, predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.weight_elements()
    }

    fn weight_elements(&self) -> usize {
        if self.memo.status().is_done() {
            1
        } else {
            self.weight
        }
    }
}

impl<E> fmt::Debug for TransformListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransformListMaterializer")
            .field("known_size", &self.known_size)
            .field("at_once", &self.at_once)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::indexed_consumer;
    use crate::context::TaskId;
    use crate::materializer::list::ResidentListMaterializer;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn resident(values: Vec<i32>) -> SharedList<i32> {
        Arc::new(ResidentListMaterializer::new(values))
    }

    #[rstest]
    fn transform_runs_once_and_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let doubled = TransformListMaterializer::new(resident(vec![1, 2, 3]), Some(3), move |elements| {
            counted.fetch_add(1, Ordering::SeqCst);
            elements.iter().map(|value| value * 2).collect()
        });
        assert!(doubled.is_materialized_at_once());
        assert_eq!(doubled.status(), Status::Pending);

        let (sender, receiver) = mpsc::channel();
        for _ in 0..3 {
            let sender = sender.clone();
            doubled.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        }
        for _ in 0..3 {
            assert_eq!(*receiver.recv().unwrap().unwrap(), vec![2, 4, 6]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.status(), Status::Succeeded);
    }

    #[rstest]
    fn element_past_end_completes_with_size() {
        let same = TransformListMaterializer::new(resident(vec![1, 2]), Some(2), |elements| {
            elements.to_vec()
        });
        let (sender, receiver) = mpsc::channel();
        same.materialize_element(5, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(crate::consumer::Lookup::Complete { size: 2 })
        );
    }

    #[rstest]
    fn panicking_transform_fails_the_node() {
        let broken = TransformListMaterializer::<i32>::new(resident(vec![1]), None, |_| {
            panic!("transform failure")
        });
        let (sender, receiver) = mpsc::channel();
        broken.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert!(receiver.recv().unwrap().unwrap_err().is_failed());
        assert_eq!(broken.status(), Status::Failed);
    }

    #[rstest]
    fn cancelled_transform_never_runs() {
        let transform = TransformListMaterializer::<i32>::new(resident(vec![1]), Some(1), |_| {
            panic!("must not run")
        });
        transform.materialize_cancel(&CancellationSignal::new(TaskId::from("t"), false));
        let (sender, receiver) = mpsc::channel();
        transform.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert!(receiver.recv().unwrap().unwrap_err().is_cancelled());
        assert!(transform.is_cancelled());
    }
}
