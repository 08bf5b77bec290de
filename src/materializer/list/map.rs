//! Incremental index-aware mapping.

use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, consumer,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// Index-aware mapping function.
pub type Mapper<E, F> = Arc<dyn Fn(usize, E) -> F + Send + Sync>;

/// Maps every element of the upstream on demand.
///
/// Single element requests and scans only map the elements they touch; the
/// full collection is mapped at most once and cached. A failing mapping
/// fails the node.
pub struct MapListMaterializer<E, F> {
    upstream: SharedList<E>,
    mapper: Mapper<E, F>,
    memo: Arc<Memo<Elements<F>>>,
}

impl<E: Element, F: Element> MapListMaterializer<E, F> {
    /// Creates a new mapping node.
    pub fn new(upstream: SharedList<E>, mapper: Mapper<E, F>) -> Self {
        Self {
            upstream,
            mapper,
            memo: Arc::new(Memo::new()),
        }
    }

    fn wrap(&self, downstream: BoxPredicate<F>) -> BoxPredicate<E> {
        Box::new(MapPredicate {
            mapper: Arc::clone(&self.mapper),
            memo: Arc::clone(&self.memo),
            downstream: Some(downstream),
        })
    }
}

impl<E: Element, F: Element> ListMaterializer<F> for MapListMaterializer<E, F> {
    fn known_size(&self) -> Option<usize> {
        self.upstream.known_size()
    }

    fn is_materialized_at_once(&self) -> bool {
        self.memo.status() == Status::Succeeded
    }

    fn status(&self) -> Status {
        self.memo.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        if self.memo.cancel(signal) {
            self.upstream.materialize_cancel(signal);
        }
    }

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<F>) {
        if let Some(outcome) = self.memo.outcome() {
            return crate::consumer::deliver(serve_element(index, target), outcome);
        }
        let mapper = Arc::clone(&self.mapper);
        let memo = Arc::clone(&self.memo);
        self.upstream.materialize_element(
            index,
            indexed_consumer(move |result| match result {
                Ok(Lookup::Found {
                    size,
                    index,
                    element,
                }) => match guard(|| mapper(index, element)) {
                    Ok(mapped) => target.accept(size, index, mapped),
                    Err(error) => {
                        memo.complete(Err(error.clone()));
                        target.error(error);
                    }
                },
                Ok(Lookup::Complete { size }) => target.complete(size),
                Err(error) => target.error(error),
            }),
        );
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<F>>) {
        self.memo.materialize(target, || {
            let mapper = Arc::clone(&self.mapper);
            let memo = Arc::clone(&self.memo);
            self.upstream
                .materialize_elements(consumer(move |result: crate::error::PipelineResult<Elements<E>>| {
                    memo.complete(result.and_then(|elements| {
                        guard(|| {
                            Arc::new(
                                elements
                                    .iter()
                                    .enumerate()
                                    .map(|(index, element)| mapper(index, element.clone()))
                                    .collect(),
                            )
                        })
                    }));
                }));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<F>) {
        match self.memo.outcome() {
            Some(outcome) => crate::consumer::deliver(serve_next_while(index, predicate), outcome),
            None => self
                .upstream
                .materialize_next_while(index, self.wrap(predicate)),
        }
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<F>) {
        match self.memo.outcome() {
            Some(outcome) => crate::consumer::deliver(serve_prev_while(index, predicate), outcome),
            None => self
                .upstream
                .materialize_prev_while(index, self.wrap(predicate)),
        }
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_element().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }

    fn weight_next_while(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }

    fn weight_prev_while(&self) -> usize {
        self.upstream.weight_prev_while().saturating_add(1)
    }
}

impl<E, F> fmt::Debug for MapListMaterializer<E, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MapListMaterializer")
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

/// Maps each scanned element before handing it to the downstream predicate.
struct MapPredicate<E, F> {
    mapper: Mapper<E, F>,
    memo: Arc<Memo<Elements<F>>>,
    downstream: Option<BoxPredicate<F>>,
}

impl<E: Element, F: Element> IndexedFuturePredicate<E> for MapPredicate<E, F> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let mapper = &self.mapper;
        match guard(|| mapper(index, element)) {
            Ok(mapped) => self
                .downstream
                .as_mut()
                .is_some_and(|downstream| downstream.test(size, index, mapped)),
            Err(error) => {
                self.memo.complete(Err(error.clone()));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::predicate;
    use crate::materializer::list::ResidentListMaterializer;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn counting_square(calls: &Arc<AtomicUsize>) -> MapListMaterializer<i32, i32> {
        let counter = Arc::clone(calls);
        MapListMaterializer::new(
            Arc::new(ResidentListMaterializer::new(vec![1, 2, 3, 4])),
            Arc::new(move |_: usize, value: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                value * value
            }),
        )
    }

    #[rstest]
    fn element_maps_only_the_requested_index() {
        let calls = Arc::new(AtomicUsize::new(0));
        let squares = counting_square(&calls);
        let (sender, receiver) = mpsc::channel();
        squares.materialize_element(2, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(Lookup::Found {
                size: Some(4),
                index: 2,
                element: 9
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(squares.known_size(), Some(4));
    }

    #[rstest]
    fn scan_stops_mapping_when_predicate_stops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let squares = counting_square(&calls);
        let (sender, receiver) = mpsc::channel();
        squares.materialize_next_while(
            0,
            predicate(
                move |_, _, square: i32| {
                    sender.send(square).unwrap();
                    square < 4
                },
                |_| {},
            ),
        );
        assert_eq!(receiver.try_iter().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn full_result_is_mapped_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let squares = counting_square(&calls);
        let (sender, receiver) = mpsc::channel();
        for _ in 0..2 {
            let sender = sender.clone();
            squares.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        }
        assert_eq!(*receiver.recv().unwrap().unwrap(), vec![1, 4, 9, 16]);
        assert_eq!(*receiver.recv().unwrap().unwrap(), vec![1, 4, 9, 16]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(squares.is_succeeded());
    }

    #[rstest]
    fn panicking_mapper_fails_the_node() {
        let broken: MapListMaterializer<i32, i32> = MapListMaterializer::new(
            Arc::new(ResidentListMaterializer::new(vec![1, 2])),
            Arc::new(|_: usize, value: i32| if value == 2 { panic!("bad element") } else { value }),
        );
        let (sender, receiver) = mpsc::channel();
        broken.materialize_next_while(
            0,
            predicate(|_, _, _| true, move |result| sender.send(result).unwrap()),
        );
        assert!(receiver.recv().unwrap().unwrap_err().is_failed());
        assert!(broken.is_failed());
    }
}
