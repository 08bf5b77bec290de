//! Keeping a fixed number of leading elements.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, deliver,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// Keeps the first `count` upstream elements.
///
/// A scan never tests upstream elements past `count`. Learning the size only
/// requires a lookup of the element at `count - 1`.
pub struct TakeListMaterializer<E> {
    upstream: SharedList<E>,
    count: usize,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> TakeListMaterializer<E> {
    /// Creates a new taking node.
    pub fn new(upstream: SharedList<E>, count: usize) -> Self {
        Self {
            upstream,
            count,
            memo: Arc::new(Memo::new()),
        }
    }

    /// Delivers the size of the view without computing more than one element.
    fn resolve_size(&self, on_size: impl FnOnce(PipelineResult<usize>) + Send + 'static) {
        let count = self.count;
        if count == 0 {
            return on_size(Ok(0));
        }
        if let Some(size) = self.known_size() {
            return on_size(Ok(size));
        }
        self.upstream.materialize_element(
            count - 1,
            indexed_consumer(move |result| match result {
                Ok(Lookup::Found { .. }) => on_size(Ok(count)),
                Ok(Lookup::Complete { size }) => on_size(Ok(size.min(count))),
                Err(error) => on_size(Err(error)),
            }),
        );
    }
}

impl<E: Element> ListMaterializer<E> for TakeListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        self.upstream.known_size().map(|size| size.min(self.count))
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
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_element(index, target), outcome);
        }
        if index >= self.count {
            return self.resolve_size(move |result| match result {
                Ok(size) => target.complete(size),
                Err(error) => target.error(error),
            });
        }
        let count = self.count;
        self.upstream.materialize_element(
            index,
            indexed_consumer(move |result| match result {
                Ok(Lookup::Found {
                    size,
                    index,
                    element,
                }) => target.accept(size.map(|size| size.min(count)), index, element),
                Ok(Lookup::Complete { size }) => target.complete(size.min(count)),
                Err(error) => target.error(error),
            }),
        );
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            if self.count == 0 {
                return self.memo.complete(Ok(Arc::new(Vec::new())));
            }
            let collected = Arc::new(Mutex::new(Vec::new()));
            let memo = Arc::clone(&self.memo);
            let count = self.count;
            let on_done = Arc::clone(&collected);
            let on_done_memo = Arc::clone(&self.memo);
            self.upstream.materialize_next_while(
                0,
                crate::consumer::predicate(
                    move |_, _, element: E| {
                        let mut elements = collected.lock();
                        elements.push(element);
                        if elements.len() < count {
                            return true;
                        }
                        let full = std::mem::take(&mut *elements);
                        drop(elements);
                        memo.complete(Ok(Arc::new(full)));
                        false
                    },
                    move |result| {
                        on_done_memo.complete(
                            result.map(|_| Arc::new(std::mem::take(&mut *on_done.lock()))),
                        );
                    },
                ),
            );
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_next_while(index, predicate), outcome);
        }
        if index >= self.count {
            return self.resolve_size(move |result| match result {
                Ok(size) => predicate.complete(size),
                Err(error) => predicate.error(error),
            });
        }
        self.upstream.materialize_next_while(
            index,
            Box::new(Limit {
                count: self.count,
                forward: true,
                downstream: Some(predicate),
            }),
        );
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_prev_while(index, predicate), outcome);
        }
        if self.count == 0 {
            return predicate.complete(0);
        }
        self.upstream.materialize_prev_while(
            index.min(self.count - 1),
            Box::new(Limit {
                count: self.count,
                forward: false,
                downstream: Some(predicate),
            }),
        );
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_element().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }
}

impl<E> fmt::Debug for TakeListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TakeListMaterializer")
            .field("count", &self.count)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

/// Caps sizes at `count` and ends forward scans at the last kept element.
struct Limit<E> {
    count: usize,
    forward: bool,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for Limit<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let capped = size.map(|size| size.min(self.count));
        let Some(downstream) = self.downstream.as_mut() else {
            return false;
        };
        if !downstream.test(capped, index, element) {
            self.downstream = None;
            return false;
        }
        if self.forward && index + 1 >= self.count {
            if let Some(downstream) = self.downstream.take() {
                downstream.complete(self.count);
            }
            return false;
        }
        true
    }

    fn complete(mut self: Box<Self>, size: usize) {
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(size.min(self.count));
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
    use crate::materializer::list::{FilterListMaterializer, ResidentListMaterializer};
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn taken(values: Vec<i32>, count: usize) -> TakeListMaterializer<i32> {
        TakeListMaterializer::new(Arc::new(ResidentListMaterializer::new(values)), count)
    }

    #[rstest]
    #[case(vec![1, 2, 3], 2, vec![1, 2])]
    #[case(vec![1, 2, 3], 5, vec![1, 2, 3])]
    #[case(vec![1, 2, 3], 0, vec![])]
    fn elements_are_capped(#[case] values: Vec<i32>, #[case] count: usize, #[case] expected: Vec<i32>) {
        let (sender, receiver) = mpsc::channel();
        taken(values, count).materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(*receiver.recv().unwrap().unwrap(), expected);
    }

    #[rstest]
    fn element_past_count_reports_capped_size() {
        let (sender, receiver) = mpsc::channel();
        taken(vec![1, 2, 3, 4], 2)
            .materialize_element(3, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), Ok(Lookup::Complete { size: 2 }));
    }

    #[rstest]
    fn scan_never_tests_past_count() {
        let tested = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tested);
        let upstream: SharedList<i32> = Arc::new(FilterListMaterializer::new(
            Arc::new(ResidentListMaterializer::new((1..=100).collect())),
            Arc::new(move |_: usize, _: &i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
        ));
        let (sender, receiver) = mpsc::channel();
        TakeListMaterializer::new(upstream, 3).materialize_next_while(
            0,
            predicate(|_, _, _: i32| true, move |result| sender.send(result).unwrap()),
        );
        assert_eq!(receiver.recv().unwrap(), Ok(3));
        assert_eq!(tested.load(Ordering::SeqCst), 3);
    }
}
