//! Incremental index-aware filtering.

use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, consumer, deliver,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// Index-aware filtering condition; the index is the upstream one.
pub type Condition<E> = Arc<dyn Fn(usize, &E) -> bool + Send + Sync>;

/// Keeps the upstream elements satisfying a condition.
///
/// The size is unknown until the upstream was scanned to the end. Looking up
/// the `n`-th kept element scans the upstream forward until `n + 1` matches
/// were seen; backward scans need the full result.
pub struct FilterListMaterializer<E> {
    upstream: SharedList<E>,
    condition: Condition<E>,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> FilterListMaterializer<E> {
    /// Creates a new filtering node.
    pub fn new(upstream: SharedList<E>, condition: Condition<E>) -> Self {
        Self {
            upstream,
            condition,
            memo: Arc::new(Memo::new()),
        }
    }
}

impl<E: Element> ListMaterializer<E> for FilterListMaterializer<E> {
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

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_element(index, target), outcome);
        }
        self.upstream.materialize_next_while(
            0,
            Box::new(FilterPredicate {
                condition: Arc::clone(&self.condition),
                memo: Arc::clone(&self.memo),
                kept: 0,
                start: index,
                downstream: Some(Downstream::Lookup(target)),
            }),
        );
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let condition = Arc::clone(&self.condition);
            let memo = Arc::clone(&self.memo);
            self.upstream
                .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                    memo.complete(result.and_then(|elements| {
                        guard(|| {
                            Arc::new(
                                elements
                                    .iter()
                                    .enumerate()
                                    .filter(|(index, element)| condition(*index, *element))
                                    .map(|(_, element)| element.clone())
                                    .collect(),
                            )
                        })
                    }));
                }));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_next_while(index, predicate), outcome);
        }
        self.upstream.materialize_next_while(
            0,
            Box::new(FilterPredicate {
                condition: Arc::clone(&self.condition),
                memo: Arc::clone(&self.memo),
                kept: 0,
                start: index,
                downstream: Some(Downstream::Scan(predicate)),
            }),
        );
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize_elements(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }
}

impl<E> fmt::Debug for FilterListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FilterListMaterializer")
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

enum Downstream<E> {
    Lookup(BoxIndexedConsumer<E>),
    Scan(BoxPredicate<E>),
}

/// Renumbers kept elements and forwards those at or past `start`.
struct FilterPredicate<E> {
    condition: Condition<E>,
    memo: Arc<Memo<Elements<E>>>,
    kept: usize,
    start: usize,
    downstream: Option<Downstream<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for FilterPredicate<E> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: E) -> bool {
        let condition = &self.condition;
        match guard(|| condition(index, &element)) {
            Ok(false) => true,
            Ok(true) => {
                let position = self.kept;
                self.kept += 1;
                if position < self.start {
                    return true;
                }
                if let Some(Downstream::Scan(predicate)) = self.downstream.as_mut() {
                    return predicate.test(None, position, element);
                }
                if let Some(Downstream::Lookup(target)) = self.downstream.take() {
                    target.accept(None, position, element);
                }
                false
            }
            Err(error) => {
                self.memo.complete(Err(error.clone()));
                self.error_downstream(error);
                false
            }
        }
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.complete(self.kept),
            Some(Downstream::Scan(predicate)) => predicate.complete(self.kept),
            None => {}
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        self.error_downstream(error);
    }
}

impl<E> FilterPredicate<E> {
    fn error_downstream(&mut self, error: PipelineError) {
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.error(error),
            Some(Downstream::Scan(predicate)) => predicate.error(error),
            None => {}
        }
    }
}
