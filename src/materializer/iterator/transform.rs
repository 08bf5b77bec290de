//! Lazy bulk transformation, then iteration over the result.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Position;
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate, consumer};
use crate::error::{CancellationSignal, PipelineResult, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, IteratorMaterializer, SharedIterator, Status};

type Source<E> = Box<dyn FnOnce(BoxConsumer<Elements<E>>) + Send>;

/// Consumes the whole upstream once, transforms it, then iterates.
pub struct TransformIteratorMaterializer<E> {
    upstream_size: Option<usize>,
    at_once: bool,
    weight: usize,
    source: Mutex<Option<Source<E>>>,
    upstream_cancel: Box<dyn Fn(&CancellationSignal) + Send + Sync>,
    memo: Arc<Memo<Elements<E>>>,
    position: Arc<Position>,
}

impl<E: Element> TransformIteratorMaterializer<E> {
    /// Transforms the remaining elements of `upstream`.
    ///
    /// `known_size` is the size of the transformed collection when it can be
    /// told from the upstream alone.
    pub fn new<U, F>(upstream: SharedIterator<U>, known_size: Option<usize>, transform: F) -> Self
    where
        U: Element,
        F: FnOnce(Elements<U>) -> Vec<E> + Send + 'static,
    {
        let at_once = upstream.is_materialized_at_once();
        let weight = upstream.weight_elements().saturating_add(1);
        let pulled = Arc::clone(&upstream);
        let source: Source<E> = Box::new(move |target| {
            pulled.materialize_elements(consumer(move |result: PipelineResult<Elements<U>>| {
                match result.and_then(|elements| guard(|| transform(elements))) {
                    Ok(elements) => target.accept(Arc::new(elements)),
                    Err(error) => target.error(error),
                }
            }));
        });
        Self {
            upstream_size: known_size,
            at_once,
            weight,
            source: Mutex::new(Some(source)),
            upstream_cancel: Box::new(move |signal| upstream.materialize_cancel(signal)),
            memo: Arc::new(Memo::new()),
            position: Arc::new(Position::default()),
        }
    }

    /// Runs `then` over the transformed elements.
    fn with_elements(&self, then: impl FnOnce(PipelineResult<Elements<E>>) + Send + 'static) {
        self.memo.materialize(consumer(then), || {
            let source = self.source.lock().take();
            if let Some(source) = source {
                source(self.memo.completer());
            }
        });
    }
}

impl<E: Element> IteratorMaterializer<E> for TransformIteratorMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        match self.memo.value() {
            Some(elements) => Some(self.position.remaining(elements.len())),
            None => self.upstream_size,
        }
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
            (self.upstream_cancel)(signal);
        }
    }

    fn materialize_has_next(&self, target: BoxConsumer<bool>) {
        let position = Arc::clone(&self.position);
        self.with_elements(move |result| match result {
            Ok(elements) => target.accept(position.remaining(elements.len()) > 0),
            Err(error) => target.error(error),
        });
    }

    fn materialize_next(&self, target: BoxIndexedConsumer<E>) {
        let position = Arc::clone(&self.position);
        self.with_elements(move |result| match result {
            Ok(elements) => position.next(&elements, target),
            Err(error) => target.error(error),
        });
    }

    fn materialize_next_while(&self, predicate: BoxPredicate<E>) {
        let position = Arc::clone(&self.position);
        self.with_elements(move |result| match result {
            Ok(elements) => position.next_while(&elements, predicate),
            Err(error) => predicate.error(error),
        });
    }

    fn materialize_skip(&self, count: usize, target: BoxConsumer<usize>) {
        let position = Arc::clone(&self.position);
        self.with_elements(move |result| match result {
            Ok(elements) => target.accept(position.skip(elements.len(), count)),
            Err(error) => target.error(error),
        });
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        let position = Arc::clone(&self.position);
        self.with_elements(move |result| match result {
            Ok(elements) => target.accept(position.rest(&elements)),
            Err(error) => target.error(error),
        });
    }

    fn weight_next(&self) -> usize {
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

impl<E> fmt::Debug for TransformIteratorMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransformIteratorMaterializer")
            .field("at_once", &self.at_once)
            .field("memo", &self.memo)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::indexed_consumer;
    use crate::context::TaskId;
    use crate::materializer::iterator::ResidentIteratorMaterializer;
    use rstest::rstest;
    use std::sync::mpsc;

    fn sorted(values: Vec<i32>) -> TransformIteratorMaterializer<i32> {
        TransformIteratorMaterializer::new(
            Arc::new(ResidentIteratorMaterializer::new(values)),
            None,
            |elements: Elements<i32>| {
                let mut sorted = elements.to_vec();
                sorted.sort_unstable();
                sorted
            },
        )
    }

    #[rstest]
    fn iterates_over_the_transformed_result() {
        let iterator = sorted(vec![3, 1, 2]);
        assert!(iterator.is_materialized_at_once());
        assert_eq!(iterator.known_size(), None);

        let (sender, receiver) = mpsc::channel();
        iterator.materialize_next(indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap().unwrap().into_element(), Some(1));
        assert_eq!(iterator.known_size(), Some(2));

        let (sender, receiver) = mpsc::channel();
        iterator.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(*receiver.recv().unwrap().unwrap(), vec![2, 3]);
        assert!(iterator.is_succeeded());
    }

    #[rstest]
    fn cancel_reaches_the_upstream() {
        let upstream: SharedIterator<i32> = Arc::new(ResidentIteratorMaterializer::new(vec![1]));
        let iterator =
            TransformIteratorMaterializer::new(Arc::clone(&upstream), Some(1), |elements: Elements<i32>| {
                elements.to_vec()
            });
        iterator.materialize_cancel(&CancellationSignal::new(TaskId::from("t"), false));
        assert!(iterator.is_cancelled());
        assert!(upstream.is_cancelled());
    }
}
