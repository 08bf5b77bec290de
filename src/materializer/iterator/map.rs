use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, consumer,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult, guard};
use crate::materializer::{Element, Elements, IteratorMaterializer, SharedIterator, Status};

/// Maps an element as it goes by.
pub type IteratorMapper<E, F> = Arc<dyn Fn(E) -> F + Send + Sync>;

/// Applies a function to every element as it is consumed.
///
/// Skipped elements are never mapped.
pub struct MapIteratorMaterializer<E, F> {
    upstream: SharedIterator<E>,
    mapper: IteratorMapper<E, F>,
    failure: Arc<Mutex<Option<PipelineError>>>,
}

impl<E: Element, F: Element> MapIteratorMaterializer<E, F> {
    /// Creates a new mapping node.
    pub fn new(upstream: SharedIterator<E>, mapper: IteratorMapper<E, F>) -> Self {
        Self {
            upstream,
            mapper,
            failure: Arc::new(Mutex::new(None)),
        }
    }

    fn failure(&self) -> Option<PipelineError> {
        self.failure.lock().clone()
    }
}

/// Records the first failure of the node.
fn record(failure: &Mutex<Option<PipelineError>>, error: &PipelineError) {
    failure.lock().get_or_insert_with(|| error.clone());
}

impl<E: Element, F: Element> IteratorMaterializer<F> for MapIteratorMaterializer<E, F> {
    fn known_size(&self) -> Option<usize> {
        self.upstream.known_size()
    }

    fn is_materialized_at_once(&self) -> bool {
        self.upstream.is_materialized_at_once()
    }

    fn status(&self) -> Status {
        match self.failure.lock().as_ref() {
            Some(PipelineError::Cancelled(_)) => Status::Cancelled,
            Some(_) => Status::Failed,
            None => self.upstream.status(),
        }
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        record(&self.failure, &PipelineError::Cancelled(signal.clone()));
        self.upstream.materialize_cancel(signal);
    }

    fn materialize_has_next(&self, target: BoxConsumer<bool>) {
        match self.failure() {
            Some(error) => target.error(error),
            None => self.upstream.materialize_has_next(target),
        }
    }

    fn materialize_next(&self, target: BoxIndexedConsumer<F>) {
        if let Some(error) = self.failure() {
            return target.error(error);
        }
        let mapper = Arc::clone(&self.mapper);
        let failure = Arc::clone(&self.failure);
        self.upstream
            .materialize_next(indexed_consumer(move |result: PipelineResult<Lookup<E>>| {
                match result {
                    Ok(Lookup::Found {
                        size,
                        index,
                        element,
                    }) => match guard(|| mapper(element)) {
                        Ok(mapped) => target.accept(size, index, mapped),
                        Err(error) => {
                            record(&failure, &error);
                            target.error(error);
                        }
                    },
                    Ok(Lookup::Complete { size }) => target.complete(size),
                    Err(error) => target.error(error),
                }
            }));
    }

    fn materialize_next_while(&self, predicate: BoxPredicate<F>) {
        if let Some(error) = self.failure() {
            return predicate.error(error);
        }
        self.upstream.materialize_next_while(Box::new(MapPredicate {
            mapper: Arc::clone(&self.mapper),
            failure: Arc::clone(&self.failure),
            downstream: Some(predicate),
        }));
    }

    fn materialize_skip(&self, count: usize, target: BoxConsumer<usize>) {
        match self.failure() {
            Some(error) => target.error(error),
            None => self.upstream.materialize_skip(count, target),
        }
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<F>>) {
        if let Some(error) = self.failure() {
            return target.error(error);
        }
        let mapper = Arc::clone(&self.mapper);
        let failure = Arc::clone(&self.failure);
        self.upstream
            .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                let mapped = result.and_then(|elements| {
                    guard(|| elements.iter().cloned().map(|element| mapper(element)).collect())
                });
                match mapped {
                    Ok(elements) => target.accept(Arc::new(elements)),
                    Err(error) => {
                        record(&failure, &error);
                        target.error(error);
                    }
                }
            }));
    }

    fn weight_next(&self) -> usize {
        self.upstream.weight_next().saturating_add(1)
    }

    fn weight_skip(&self) -> usize {
        self.upstream.weight_skip()
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }
}

struct MapPredicate<E, F> {
    mapper: IteratorMapper<E, F>,
    failure: Arc<Mutex<Option<PipelineError>>>,
    downstream: Option<BoxPredicate<F>>,
}

impl<E: Element, F: Element> IndexedFuturePredicate<E> for MapPredicate<E, F> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let Some(downstream) = self.downstream.as_mut() else {
            return false;
        };
        match guard(|| (self.mapper)(element)) {
            Ok(mapped) => downstream.test(size, index, mapped),
            Err(error) => {
                record(&self.failure, &error);
                if let Some(downstream) = self.downstream.take() {
                    downstream.error(error);
                }
                false
            }
        }
    }

    fn complete(mut self: Box<Self>, size: usize) {
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(size);
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}

impl<E, F> fmt::Debug for MapIteratorMaterializer<E, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MapIteratorMaterializer")
            .field("failed", &self.failure.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::predicate;
    use crate::materializer::iterator::ResidentIteratorMaterializer;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn doubled(values: Vec<i32>, calls: &Arc<AtomicUsize>) -> MapIteratorMaterializer<i32, i32> {
        let counter = Arc::clone(calls);
        MapIteratorMaterializer::new(
            Arc::new(ResidentIteratorMaterializer::new(values)),
            Arc::new(move |value: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                value * 2
            }),
        )
    }

    #[rstest]
    fn skipped_elements_are_not_mapped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let iterator = doubled(vec![1, 2, 3, 4], &calls);

        let (sender, receiver) = mpsc::channel();
        iterator.materialize_skip(2, consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), Ok(2));

        let (sender, receiver) = mpsc::channel();
        iterator.materialize_next(indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap().unwrap().into_element(), Some(6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(iterator.known_size(), Some(1));
    }

    #[rstest]
    fn scan_maps_consumed_elements_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let iterator = doubled(vec![1, 2, 3, 4], &calls);
        let (sender, receiver) = mpsc::channel();
        iterator.materialize_next_while(predicate(
            move |_, _, value: i32| {
                sender.send(value).unwrap();
                value < 4
            },
            |_| {},
        ));
        assert_eq!(receiver.try_iter().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn panicking_mapper_fails_the_node() {
        let iterator = MapIteratorMaterializer::<i32, i32>::new(
            Arc::new(ResidentIteratorMaterializer::new(vec![1, 2])),
            Arc::new(|_: i32| -> i32 { panic!("mapper failure") }),
        );
        let (sender, receiver) = mpsc::channel();
        iterator.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert!(receiver.recv().unwrap().unwrap_err().is_failed());
        assert!(iterator.is_failed());
    }
}
