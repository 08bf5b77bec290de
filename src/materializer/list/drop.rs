//! Dropping a fixed number of leading elements.

use std::fmt;
use std::sync::Arc;

use super::{serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, deliver,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status, map_consumer};

/// Skips the first `count` upstream elements.
///
/// Indexes are shifted by `count` on the way up and back on the way down, so
/// no element before `count` is ever computed by a lookup or a scan.
pub struct DropListMaterializer<E> {
    upstream: SharedList<E>,
    count: usize,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> DropListMaterializer<E> {
    /// Creates a new dropping node.
    pub fn new(upstream: SharedList<E>, count: usize) -> Self {
        Self {
            upstream,
            count,
            memo: Arc::new(Memo::new()),
        }
    }
}

impl<E: Element> ListMaterializer<E> for DropListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        self.upstream
            .known_size()
            .map(|size| size.saturating_sub(self.count))
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
        if let Some(error) = self.memo.error() {
            return target.error(error);
        }
        let count = self.count;
        match index.checked_add(count) {
            Some(shifted) => self.upstream.materialize_element(
                shifted,
                indexed_consumer(move |result| match result {
                    Ok(Lookup::Found { size, element, .. }) => {
                        target.accept(size.map(|size| size.saturating_sub(count)), index, element);
                    }
                    Ok(Lookup::Complete { size }) => target.complete(size.saturating_sub(count)),
                    Err(error) => target.error(error),
                }),
            ),
            None => self.materialize_size(map_consumer_to_complete(target)),
        }
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let count = self.count;
            self.upstream.materialize_elements(map_consumer(
                self.memo.completer(),
                move |elements: Elements<E>| {
                    Arc::new(elements.get(count..).map(<[E]>::to_vec).unwrap_or_default())
                },
            ));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_next_while(index, predicate), outcome);
        }
        self.upstream.materialize_next_while(
            index.saturating_add(self.count),
            Box::new(ShiftDown {
                count: self.count,
                downstream: Some(predicate),
            }),
        );
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_prev_while(index, predicate), outcome);
        }
        self.upstream.materialize_prev_while(
            index.saturating_add(self.count),
            Box::new(ShiftDown {
                count: self.count,
                downstream: Some(predicate),
            }),
        );
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_element().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }
}

impl<E> fmt::Debug for DropListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DropListMaterializer")
            .field("count", &self.count)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

fn map_consumer_to_complete<E: Element>(target: BoxIndexedConsumer<E>) -> BoxConsumer<usize> {
    crate::consumer::consumer(move |result| match result {
        Ok(size) => target.complete(size),
        Err(error) => target.error(error),
    })
}

/// Maps upstream positions back into the dropped view.
///
/// A backward scan reaching the dropped prefix ends the scan as complete
/// when the size is known; otherwise the prefix is skipped until the
/// upstream completes with its size.
struct ShiftDown<E> {
    count: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for ShiftDown<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let shifted_size = size.map(|size| size.saturating_sub(self.count));
        if index < self.count {
            let Some(shifted_size) = shifted_size else {
                return self.downstream.is_some();
            };
            if let Some(downstream) = self.downstream.take() {
                downstream.complete(shifted_size);
            }
            return false;
        }
        self.downstream
            .as_mut()
            .is_some_and(|downstream| downstream.test(shifted_size, index - self.count, element))
    }

    fn complete(mut self: Box<Self>, size: usize) {
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(size.saturating_sub(self.count));
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
    use crate::consumer::{consumer, predicate};
    use crate::materializer::list::ResidentListMaterializer;
    use rstest::rstest;
    use std::sync::mpsc;

    fn dropped(count: usize) -> DropListMaterializer<i32> {
        DropListMaterializer::new(Arc::new(ResidentListMaterializer::new(vec![1, 2, 3, 4, 5])), count)
    }

    #[rstest]
    #[case(2, Some(3))]
    #[case(5, Some(0))]
    #[case(9, Some(0))]
    fn known_size_subtracts(#[case] count: usize, #[case] expected: Option<usize>) {
        assert_eq!(dropped(count).known_size(), expected);
    }

    #[rstest]
    fn element_is_shifted() {
        let (sender, receiver) = mpsc::channel();
        dropped(2).materialize_element(0, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(Lookup::Found {
                size: Some(3),
                index: 0,
                element: 3
            })
        );
    }

    #[rstest]
    fn backward_scan_stops_at_dropped_prefix() {
        let (sender, receiver) = mpsc::channel();
        let (done_sender, done) = mpsc::channel();
        dropped(3).materialize_prev_while(
            10,
            predicate(
                move |_, index, value: i32| {
                    sender.send((index, value)).unwrap();
                    true
                },
                move |result| done_sender.send(result).unwrap(),
            ),
        );
        assert_eq!(receiver.try_iter().collect::<Vec<_>>(), vec![(1, 5), (0, 4)]);
        assert_eq!(done.recv().unwrap(), Ok(2));
    }

    /// Scans backwards without telling the size until it completes.
    struct Unsized(Vec<i32>);

    impl ListMaterializer<i32> for Unsized {
        fn known_size(&self) -> Option<usize> {
            None
        }

        fn is_materialized_at_once(&self) -> bool {
            false
        }

        fn status(&self) -> Status {
            Status::Pending
        }

        fn materialize_cancel(&self, _signal: &CancellationSignal) {}

        fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<i32>) {
            crate::materializer::lookup(&self.0, index, target);
        }

        fn materialize_elements(&self, target: BoxConsumer<Elements<i32>>) {
            target.accept(Arc::new(self.0.clone()));
        }

        fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<i32>) {
            crate::materializer::scan_forward(&self.0, index, predicate);
        }

        fn materialize_prev_while(&self, index: usize, mut predicate: BoxPredicate<i32>) {
            if let Some(last) = self.0.len().checked_sub(1) {
                for position in (0..=index.min(last)).rev() {
                    if !predicate.test(None, position, self.0[position]) {
                        return;
                    }
                }
            }
            predicate.complete(self.0.len());
        }

        fn weight_element(&self) -> usize {
            1
        }

        fn weight_elements(&self) -> usize {
            1
        }
    }

    #[rstest]
    fn backward_scan_over_unsized_upstream_reports_the_real_size() {
        let dropped = DropListMaterializer::new(Arc::new(Unsized(vec![1, 2, 3, 4, 5])), 2);
        let (sender, receiver) = mpsc::channel();
        let (done_sender, done) = mpsc::channel();
        dropped.materialize_prev_while(
            10,
            predicate(
                move |_, index, value: i32| {
                    sender.send((index, value)).unwrap();
                    true
                },
                move |result| done_sender.send(result).unwrap(),
            ),
        );
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![(2, 5), (1, 4), (0, 3)]
        );
        assert_eq!(done.recv().unwrap(), Ok(3));
    }

    #[rstest]
    fn elements_skip_prefix() {
        let (sender, receiver) = mpsc::channel();
        dropped(4).materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(*receiver.recv().unwrap().unwrap(), vec![5]);
    }
}
