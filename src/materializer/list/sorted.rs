//! Stable sorting.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate};
use crate::error::CancellationSignal;
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status, map_consumer};

/// Total order used for sorting.
pub type Comparator<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

/// The upstream elements in the order of a comparator.
///
/// Any element of a sorted sequence may come from anywhere in the upstream,
/// so every request waits for the full upstream result. The sorted result is
/// computed once and cached; the size is the upstream one.
pub struct SortedListMaterializer<E> {
    upstream: SharedList<E>,
    compare: Comparator<E>,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> SortedListMaterializer<E> {
    /// Creates a new sorting node.
    pub fn new(upstream: SharedList<E>, compare: Comparator<E>) -> Self {
        Self {
            upstream,
            compare,
            memo: Arc::new(Memo::new()),
        }
    }

    fn materialize(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let compare = Arc::clone(&self.compare);
            self.upstream.materialize_elements(map_consumer(
                self.memo.completer(),
                move |elements: Elements<E>| {
                    let mut sorted = elements.to_vec();
                    sorted.sort_by(|left, right| compare(left, right));
                    Arc::new(sorted)
                },
            ));
        });
    }
}

impl<E: Element> ListMaterializer<E> for SortedListMaterializer<E> {
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

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        self.materialize(serve_element(index, target));
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.materialize(target);
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
            self.upstream.weight_elements().saturating_add(1)
        }
    }
}

impl<E> fmt::Debug for SortedListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SortedListMaterializer")
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Lookup, consumer, indexed_consumer};
    use crate::context::TaskId;
    use crate::materializer::list::{FilterListMaterializer, ResidentListMaterializer};
    use rstest::rstest;
    use std::sync::mpsc;

    fn by_key() -> Comparator<(i32, char)> {
        Arc::new(|left: &(i32, char), right: &(i32, char)| left.0.cmp(&right.0))
    }

    #[rstest]
    fn sort_is_stable() {
        let sorted = SortedListMaterializer::<(i32, char)>::new(
            Arc::new(ResidentListMaterializer::new(vec![(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd')])),
            by_key(),
        );
        let (sender, receiver) = mpsc::channel();
        sorted.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(
            *receiver.recv().unwrap().unwrap(),
            vec![(1, 'b'), (1, 'd'), (2, 'a'), (2, 'c')]
        );
        assert_eq!(sorted.known_size(), Some(4));
    }

    #[rstest]
    fn element_lookup_sorts_once() {
        let sorted = SortedListMaterializer::<i32>::new(
            Arc::new(FilterListMaterializer::<i32>::new(
                Arc::new(ResidentListMaterializer::new(vec![5, 3, 8, 1])),
                Arc::new(|_: usize, value: &i32| *value > 1),
            )),
            Arc::new(|left: &i32, right: &i32| left.cmp(right)),
        );
        assert_eq!(sorted.known_size(), None);

        let (sender, receiver) = mpsc::channel();
        for index in [0, 2] {
            let sender = sender.clone();
            sorted.materialize_element(index, indexed_consumer(move |result| sender.send(result).unwrap()));
        }
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(Lookup::Found {
                size: Some(3),
                index: 0,
                element: 3
            })
        );
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(Lookup::Found {
                size: Some(3),
                index: 2,
                element: 8
            })
        );
        assert!(sorted.is_succeeded());
    }

    #[rstest]
    fn cancellation_reaches_the_upstream() {
        let upstream: SharedList<i32> = Arc::new(FilterListMaterializer::<i32>::new(
            Arc::new(ResidentListMaterializer::new(vec![1])),
            Arc::new(|_: usize, _: &i32| true),
        ));
        let sorted = SortedListMaterializer::new(
            Arc::clone(&upstream),
            Arc::new(|left: &i32, right: &i32| left.cmp(right)),
        );
        sorted.materialize_cancel(&CancellationSignal::new(TaskId::from("sort"), false));
        assert!(sorted.is_cancelled());
        assert!(upstream.is_cancelled());
    }
}
