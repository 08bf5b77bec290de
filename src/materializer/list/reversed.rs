//! Reversing the order of a sequence.

use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, consumer,
    deliver, indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status, map_consumer};

/// The upstream elements, last to first.
///
/// Once the upstream size is known, element `i` is upstream element
/// `size - 1 - i`, forward scans become upstream backward scans and the other
/// way round. Only the elements a request reaches are computed.
pub struct ReversedListMaterializer<E> {
    upstream: SharedList<E>,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> ReversedListMaterializer<E> {
    /// Creates a new reversing node.
    pub fn new(upstream: SharedList<E>) -> Self {
        Self {
            upstream,
            memo: Arc::new(Memo::new()),
        }
    }

    /// Runs `request` once the upstream size is known.
    fn with_size(
        &self,
        request: impl FnOnce(PipelineResult<(SharedList<E>, usize)>) + Send + 'static,
    ) {
        let upstream = Arc::clone(&self.upstream);
        self.upstream
            .materialize_size(consumer(move |result: PipelineResult<usize>| {
                request(result.map(|size| (upstream, size)));
            }));
    }
}

impl<E: Element> ListMaterializer<E> for ReversedListMaterializer<E> {
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
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_element(index, target), outcome);
        }
        self.with_size(move |sized| match sized {
            Ok((_, size)) if index >= size => target.complete(size),
            Ok((upstream, size)) => upstream.materialize_element(
                size - 1 - index,
                indexed_consumer(move |result| match result {
                    Ok(Lookup::Found { element, .. }) => target.accept(Some(size), index, element),
                    Ok(Lookup::Complete { size }) => target.complete(size),
                    Err(error) => target.error(error),
                }),
            ),
            Err(error) => target.error(error),
        });
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            self.upstream.materialize_elements(map_consumer(
                self.memo.completer(),
                |elements: Elements<E>| Arc::new(elements.iter().rev().cloned().collect()),
            ));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_next_while(index, predicate), outcome);
        }
        self.with_size(move |sized| match sized {
            Ok((_, size)) if index >= size => predicate.complete(size),
            Ok((upstream, size)) => upstream.materialize_prev_while(
                size - 1 - index,
                Box::new(Mirror {
                    size,
                    downstream: Some(predicate),
                }),
            ),
            Err(error) => predicate.error(error),
        });
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_prev_while(index, predicate), outcome);
        }
        self.with_size(move |sized| match sized {
            Ok((_, 0)) => predicate.complete(0),
            Ok((upstream, size)) => upstream.materialize_next_while(
                size - 1 - index.min(size - 1),
                Box::new(Mirror {
                    size,
                    downstream: Some(predicate),
                }),
            ),
            Err(error) => predicate.error(error),
        });
    }

    fn weight_element(&self) -> usize {
        self.upstream
            .weight_size()
            .saturating_add(self.upstream.weight_element())
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }

    fn weight_next_while(&self) -> usize {
        self.upstream
            .weight_size()
            .saturating_add(self.upstream.weight_prev_while())
    }

    fn weight_prev_while(&self) -> usize {
        self.upstream
            .weight_size()
            .saturating_add(self.upstream.weight_next_while())
    }
}

impl<E> fmt::Debug for ReversedListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReversedListMaterializer")
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

/// Maps upstream positions to mirrored ones.
struct Mirror<E> {
    size: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for Mirror<E> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: E) -> bool {
        let size = self.size;
        self.downstream.as_mut().is_some_and(|downstream| {
            downstream.test(Some(size), size - 1 - index, element)
        })
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(self.size);
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}
