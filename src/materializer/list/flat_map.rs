//! Incremental expansion of every element into a sequence.

use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, deliver,
};
use crate::error::{CancellationSignal, PipelineError, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{
    Element, Elements, ListMaterializer, SharedList, Status, map_consumer, test_element,
};

/// Expands one upstream element into the elements replacing it.
pub type Expander<E, F> = Arc<dyn Fn(E) -> Vec<F> + Send + Sync>;

/// Concatenates the expansions of the upstream elements.
///
/// Upstream elements are expanded only as far as a lookup or a forward scan
/// reaches: the `n`-th element is found by scanning the upstream until `n + 1`
/// elements were produced. Backward scans need the full result.
pub struct FlatMapListMaterializer<E, F> {
    upstream: SharedList<E>,
    expander: Expander<E, F>,
    memo: Arc<Memo<Elements<F>>>,
}

impl<E: Element, F: Element> FlatMapListMaterializer<E, F> {
    /// Creates a new expanding node.
    pub fn new(upstream: SharedList<E>, expander: Expander<E, F>) -> Self {
        Self {
            upstream,
            expander,
            memo: Arc::new(Memo::new()),
        }
    }

    fn expand(&self, start: usize, downstream: Downstream<F>) {
        self.upstream.materialize_next_while(
            0,
            Box::new(Expand {
                expander: Arc::clone(&self.expander),
                memo: Arc::clone(&self.memo),
                produced: 0,
                start,
                downstream: Some(downstream),
            }),
        );
    }
}

impl<E: Element, F: Element> ListMaterializer<F> for FlatMapListMaterializer<E, F> {
    fn known_size(&self) -> Option<usize> {
        match self.upstream.known_size() {
            Some(0) => Some(0),
            _ => self.memo.value().map(|elements| elements.len()),
        }
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
            return deliver(serve_element(index, target), outcome);
        }
        self.expand(index, Downstream::Lookup(target));
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<F>>) {
        self.memo.materialize(target, || {
            let expander = Arc::clone(&self.expander);
            self.upstream.materialize_elements(map_consumer(
                self.memo.completer(),
                move |elements: Elements<E>| {
                    Arc::new(
                        elements
                            .iter()
                            .cloned()
                            .flat_map(|element| expander(element))
                            .collect(),
                    )
                },
            ));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<F>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_next_while(index, predicate), outcome);
        }
        self.expand(index, Downstream::Scan(predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<F>) {
        self.materialize_elements(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }
}

impl<E, F> fmt::Debug for FlatMapListMaterializer<E, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FlatMapListMaterializer")
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

enum Downstream<F> {
    Lookup(BoxIndexedConsumer<F>),
    Scan(BoxPredicate<F>),
}

/// Numbers the produced elements and forwards those at or past `start`.
struct Expand<E, F> {
    expander: Expander<E, F>,
    memo: Arc<Memo<Elements<F>>>,
    produced: usize,
    start: usize,
    downstream: Option<Downstream<F>>,
}

impl<E: Element, F: Element> Expand<E, F> {
    /// Forwards one produced element. Returns `false` once the downstream
    /// is served or stopped.
    fn forward(&mut self, element: F) -> bool {
        let position = self.produced;
        self.produced += 1;
        if position < self.start {
            return true;
        }
        match self.downstream.take() {
            Some(Downstream::Scan(mut predicate)) => {
                match test_element(&mut predicate, None, position, element) {
                    Ok(true) => {
                        self.downstream = Some(Downstream::Scan(predicate));
                        true
                    }
                    Ok(false) => false,
                    Err(error) => {
                        predicate.error(error);
                        false
                    }
                }
            }
            Some(Downstream::Lookup(target)) => {
                target.accept(None, position, element);
                false
            }
            None => false,
        }
    }

    fn error_downstream(&mut self, error: PipelineError) {
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.error(error),
            Some(Downstream::Scan(predicate)) => predicate.error(error),
            None => {}
        }
    }
}

impl<E: Element, F: Element> IndexedFuturePredicate<E> for Expand<E, F> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: E) -> bool {
        let expander = &self.expander;
        match guard(|| expander(element)) {
            Ok(expanded) => expanded.into_iter().all(|produced| self.forward(produced)),
            Err(error) => {
                self.memo.complete(Err(error.clone()));
                self.error_downstream(error);
                false
            }
        }
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.complete(self.produced),
            Some(Downstream::Scan(predicate)) => predicate.complete(self.produced),
            None => {}
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        self.error_downstream(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Lookup, consumer, indexed_consumer, predicate};
    use crate::error::PipelineResult;
    use crate::materializer::list::ResidentListMaterializer;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn repeated(values: Vec<usize>, expansions: &Arc<AtomicUsize>) -> FlatMapListMaterializer<usize, usize> {
        let counter = Arc::clone(expansions);
        FlatMapListMaterializer::new(
            Arc::new(ResidentListMaterializer::<usize>::new(values)),
            Arc::new(move |value: usize| {
                counter.fetch_add(1, Ordering::SeqCst);
                vec![value; value]
            }),
        )
    }

    #[rstest]
    #[case(0, Ok(Lookup::Found { size: None, index: 0, element: 1 }), 1)]
    #[case(2, Ok(Lookup::Found { size: None, index: 2, element: 3 }), 3)]
    #[case(3, Ok(Lookup::Found { size: None, index: 3, element: 3 }), 3)]
    #[case(4, Ok(Lookup::Complete { size: 4 }), 3)]
    fn element_expands_only_as_far_as_needed(
        #[case] index: usize,
        #[case] expected: PipelineResult<Lookup<usize>>,
        #[case] expanded: usize,
    ) {
        let expansions = Arc::new(AtomicUsize::new(0));
        let flat = repeated(vec![1, 0, 3], &expansions);
        let (sender, receiver) = mpsc::channel();
        flat.materialize_element(index, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), expected);
        assert_eq!(expansions.load(Ordering::SeqCst), expanded);
    }

    #[rstest]
    fn forward_scan_stops_inside_an_expansion() {
        let expansions = Arc::new(AtomicUsize::new(0));
        let flat = repeated(vec![2, 3, 4], &expansions);
        let (sender, receiver) = mpsc::channel();
        flat.materialize_next_while(
            1,
            predicate(
                move |_, index, value: usize| {
                    sender.send((index, value)).unwrap();
                    index < 3
                },
                |_| panic!("stopped scans do not complete"),
            ),
        );
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![(1, 2), (2, 3), (3, 3)]
        );
        assert_eq!(expansions.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn elements_concatenate_expansions() {
        let expansions = Arc::new(AtomicUsize::new(0));
        let flat = repeated(vec![2, 0, 1], &expansions);
        let (sender, receiver) = mpsc::channel();
        flat.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(*receiver.recv().unwrap().unwrap(), vec![2, 2, 1]);
        assert_eq!(flat.known_size(), Some(3));
    }

    #[rstest]
    fn panicking_expander_fails_the_lookup() {
        let flat = FlatMapListMaterializer::<i32, i32>::new(
            Arc::new(ResidentListMaterializer::new(vec![1])),
            Arc::new(|_: i32| -> Vec<i32> { panic!("expansion failure") }),
        );
        let (sender, receiver) = mpsc::channel();
        flat.materialize_element(0, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert!(receiver.recv().unwrap().unwrap_err().is_failed());
        assert!(flat.is_failed());
    }
}
