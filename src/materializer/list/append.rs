//! Concatenation of two sequences.

use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, consumer,
    deliver, indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::memo::Memo;
use crate::materializer::{
    Element, Elements, ListMaterializer, SharedList, Status, add_sizes,
};

/// The elements of `left` followed by the elements of `right`.
///
/// Lookups and forward scans only touch `right` once `left` is exhausted.
/// Cancellation reaches the primary side only; the other one is an argument
/// pipeline.
pub struct AppendAllListMaterializer<E> {
    left: SharedList<E>,
    right: SharedList<E>,
    primary_is_left: bool,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element> AppendAllListMaterializer<E> {
    /// Appends `right` to the primary `left`.
    pub fn new(left: SharedList<E>, right: SharedList<E>) -> Self {
        Self::build(left, right, true)
    }

    /// Prepends `left` to the primary `right`.
    pub fn prepended(left: SharedList<E>, right: SharedList<E>) -> Self {
        Self::build(left, right, false)
    }

    fn build(left: SharedList<E>, right: SharedList<E>, primary_is_left: bool) -> Self {
        Self {
            left,
            right,
            primary_is_left,
            memo: Arc::new(Memo::new()),
        }
    }

    fn primary(&self) -> &SharedList<E> {
        if self.primary_is_left {
            &self.left
        } else {
            &self.right
        }
    }
}

impl<E: Element> ListMaterializer<E> for AppendAllListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        add_sizes(self.left.known_size(), self.right.known_size())
    }

    fn is_materialized_at_once(&self) -> bool {
        self.memo.status() == Status::Succeeded
    }

    fn status(&self) -> Status {
        self.memo.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        if self.memo.cancel(signal) {
            self.primary().materialize_cancel(signal);
        }
    }

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_element(index, target), outcome);
        }
        let right = Arc::clone(&self.right);
        let right_known = self.right.known_size();
        self.left.materialize_element(
            index,
            indexed_consumer(move |result| match result {
                Ok(Lookup::Found { size, element, .. }) => {
                    target.accept(add_sizes(size, right_known), index, element);
                }
                Ok(Lookup::Complete { size: left_size }) => right.materialize_element(
                    index - left_size,
                    indexed_consumer(move |result| match result {
                        Ok(Lookup::Found { size, element, .. }) => target.accept(
                            size.map(|size| size.saturating_add(left_size)),
                            index,
                            element,
                        ),
                        Ok(Lookup::Complete { size }) => {
                            target.complete(size.saturating_add(left_size));
                        }
                        Err(error) => target.error(error),
                    }),
                ),
                Err(error) => target.error(error),
            }),
        );
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let right = Arc::clone(&self.right);
            let memo = Arc::clone(&self.memo);
            self.left
                .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                    match result {
                        Ok(left) => right.materialize_elements(consumer(
                            move |result: PipelineResult<Elements<E>>| {
                                memo.complete(result.map(|right| {
                                    let mut joined = Vec::with_capacity(left.len() + right.len());
                                    joined.extend_from_slice(&left);
                                    joined.extend_from_slice(&right);
                                    Arc::new(joined)
                                }));
                            },
                        )),
                        Err(error) => memo.complete(Err(error)),
                    }
                }));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_next_while(index, predicate), outcome);
        }
        self.left.materialize_next_while(
            index,
            Box::new(ThenRight {
                right: Arc::clone(&self.right),
                right_known: self.right.known_size(),
                index,
                downstream: Some(predicate),
            }),
        );
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_prev_while(index, predicate), outcome);
        }
        let left = Arc::clone(&self.left);
        let right = Arc::clone(&self.right);
        self.left.materialize_size(consumer(move |result| match result {
            Ok(left_size) if index >= left_size => right.materialize_prev_while(
                index - left_size,
                Box::new(ThenLeft {
                    left,
                    left_size,
                    downstream: Some(predicate),
                }),
            ),
            Ok(left_size) => {
                let scanned = Arc::clone(&left);
                right.materialize_size(consumer(move |result| match result {
                    Ok(right_size) => scanned.materialize_prev_while(
                        index,
                        Box::new(WholeSize {
                            size: left_size.saturating_add(right_size),
                            downstream: Some(predicate),
                        }),
                    ),
                    Err(error) => predicate.error(error),
                }));
            }
            Err(error) => predicate.error(error),
        }));
    }

    fn weight_element(&self) -> usize {
        self.left
            .weight_element()
            .saturating_add(self.right.weight_element())
    }

    fn weight_elements(&self) -> usize {
        self.left
            .weight_elements()
            .saturating_add(self.right.weight_elements())
    }
}

impl<E> fmt::Debug for AppendAllListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppendAllListMaterializer")
            .field("primary_is_left", &self.primary_is_left)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

/// Forward scan over the left side that continues into the right side.
struct ThenRight<E> {
    right: SharedList<E>,
    right_known: Option<usize>,
    index: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for ThenRight<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let total = add_sizes(size, self.right_known);
        self.downstream
            .as_mut()
            .is_some_and(|downstream| downstream.test(total, index, element))
    }

    fn complete(mut self: Box<Self>, left_size: usize) {
        if let Some(downstream) = self.downstream.take() {
            self.right.materialize_next_while(
                self.index.saturating_sub(left_size),
                Box::new(Shifted {
                    offset: left_size,
                    downstream: Some(downstream),
                }),
            );
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}

/// Backward scan over the right side that continues into the left side.
struct ThenLeft<E> {
    left: SharedList<E>,
    left_size: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for ThenLeft<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let offset = self.left_size;
        self.downstream.as_mut().is_some_and(|downstream| {
            downstream.test(
                size.map(|size| size.saturating_add(offset)),
                index + offset,
                element,
            )
        })
    }

    fn complete(mut self: Box<Self>, right_size: usize) {
        let Some(downstream) = self.downstream.take() else {
            return;
        };
        let size = self.left_size.saturating_add(right_size);
        if self.left_size == 0 {
            return downstream.complete(size);
        }
        self.left.materialize_prev_while(
            self.left_size - 1,
            Box::new(WholeSize {
                size,
                downstream: Some(downstream),
            }),
        );
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}

/// Shifts positions of the right side past the left side.
struct Shifted<E> {
    offset: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for Shifted<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let offset = self.offset;
        self.downstream.as_mut().is_some_and(|downstream| {
            downstream.test(
                size.map(|size| size.saturating_add(offset)),
                index + offset,
                element,
            )
        })
    }

    fn complete(mut self: Box<Self>, size: usize) {
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(size.saturating_add(self.offset));
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}

/// Reports the size of the whole concatenation while scanning one side.
struct WholeSize<E> {
    size: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for WholeSize<E> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: E) -> bool {
        let size = Some(self.size);
        self.downstream
            .as_mut()
            .is_some_and(|downstream| downstream.test(size, index, element))
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
