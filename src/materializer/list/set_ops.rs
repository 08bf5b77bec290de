//! Multiset algebra over two sequences.
//!
//! Elements are compared with `PartialEq` and duplicates are significant:
//! every element of the right side cancels at most one equal element of the
//! left side. Results keep the order of the left side, then of the right.
//!
//! [`SetOperation::apply`] works on resident sequences;
//! [`SetOperationListMaterializer`] materializes the right side once and
//! streams the left side through it.

use std::fmt;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, consumer, deliver,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status, test_element};

/// A binary multiset operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperation {
    /// Left elements not matched by a right element.
    Diff,
    /// Left elements matched by a right element.
    Intersect,
    /// All left elements, then the right elements not matched by a left one.
    Union,
    /// Unmatched left elements, then unmatched right elements.
    SymmetricDiff,
}

impl SetOperation {
    /// Applies the operation to resident sequences.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lazy_collections::materializer::list::SetOperation;
    ///
    /// let left = [1, 2, 2, 3];
    /// let right = [2, 4];
    /// assert_eq!(SetOperation::Diff.apply(&left, &right), vec![1, 2, 3]);
    /// assert_eq!(SetOperation::Intersect.apply(&left, &right), vec![2]);
    /// assert_eq!(SetOperation::Union.apply(&left, &right), vec![1, 2, 2, 3, 4]);
    /// assert_eq!(SetOperation::SymmetricDiff.apply(&left, &right), vec![1, 2, 3, 4]);
    /// ```
    #[must_use]
    pub fn apply<E: Clone + PartialEq>(self, left: &[E], right: &[E]) -> Vec<E> {
        match self {
            Self::Diff => partition(left, right).1,
            Self::Intersect => partition(left, right).0,
            Self::Union => {
                let mut union = left.to_vec();
                union.extend(partition(right, left).1);
                union
            }
            Self::SymmetricDiff => {
                let mut symmetric = partition(left, right).1;
                symmetric.extend(partition(right, left).1);
                symmetric
            }
        }
    }

    /// Whether an empty left side always yields an empty result.
    #[must_use]
    pub const fn is_empty_for_empty_left(self) -> bool {
        matches!(self, Self::Diff | Self::Intersect)
    }

    /// Whether a left element is part of the result, given whether it was
    /// matched by a right element.
    const fn keeps_left(self, matched: bool) -> bool {
        match self {
            Self::Diff | Self::SymmetricDiff => !matched,
            Self::Intersect => matched,
            Self::Union => true,
        }
    }

    /// Whether the unmatched right elements follow the left ones.
    const fn keeps_right(self) -> bool {
        matches!(self, Self::Union | Self::SymmetricDiff)
    }
}

// =============================================================================
// Streaming node
// =============================================================================

/// Applies a [`SetOperation`] between the primary `left` upstream and an
/// argument `right` sequence.
///
/// Lookups and forward scans materialize `right` once per request and then
/// scan `left` only as far as needed, matching every left element against the
/// right elements not matched yet. The unmatched right elements are produced
/// once `left` is exhausted. Cancellation reaches `left` only.
pub struct SetOperationListMaterializer<E> {
    left: SharedList<E>,
    right: SharedList<E>,
    operation: SetOperation,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E: Element + PartialEq> SetOperationListMaterializer<E> {
    /// Creates a new set algebra node.
    pub fn new(left: SharedList<E>, right: SharedList<E>, operation: SetOperation) -> Self {
        Self {
            left,
            right,
            operation,
            memo: Arc::new(Memo::new()),
        }
    }

    fn stream(&self, start: usize, downstream: Downstream<E>) {
        let left = Arc::clone(&self.left);
        let operation = self.operation;
        self.right
            .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                match result {
                    Ok(right) => left.materialize_next_while(
                        0,
                        Box::new(Match {
                            operation,
                            available: right.iter().cloned().map(Some).collect(),
                            produced: 0,
                            start,
                            downstream: Some(downstream),
                        }),
                    ),
                    Err(error) => match downstream {
                        Downstream::Lookup(target) => target.error(error),
                        Downstream::Scan(predicate) => predicate.error(error),
                    },
                }
            }));
    }
}

impl<E: Element + PartialEq> ListMaterializer<E> for SetOperationListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        if self.operation.is_empty_for_empty_left() && self.left.known_size() == Some(0) {
            return Some(0);
        }
        self.memo.value().map(|elements| elements.len())
    }

    fn is_materialized_at_once(&self) -> bool {
        self.memo.status() == Status::Succeeded
    }

    fn status(&self) -> Status {
        self.memo.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        if self.memo.cancel(signal) {
            self.left.materialize_cancel(signal);
        }
    }

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        if let Some(outcome) = self.memo.outcome() {
            return deliver(serve_element(index, target), outcome);
        }
        self.stream(index, Downstream::Lookup(target));
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let right = Arc::clone(&self.right);
            let operation = self.operation;
            let memo = Arc::clone(&self.memo);
            self.left
                .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                    match result {
                        Ok(left) => right.materialize_elements(consumer(
                            move |result: PipelineResult<Elements<E>>| {
                                memo.complete(
                                    result.map(|right| Arc::new(operation.apply(&left, &right))),
                                );
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
        self.stream(index, Downstream::Scan(predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize_elements(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.right
            .weight_elements()
            .saturating_add(self.left.weight_next_while())
    }

    fn weight_elements(&self) -> usize {
        self.right
            .weight_elements()
            .saturating_add(self.left.weight_elements())
    }
}

impl<E> fmt::Debug for SetOperationListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SetOperationListMaterializer")
            .field("operation", &self.operation)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

enum Downstream<E> {
    Lookup(BoxIndexedConsumer<E>),
    Scan(BoxPredicate<E>),
}

/// Matches left elements against the right elements still available.
struct Match<E> {
    operation: SetOperation,
    available: Vec<Option<E>>,
    produced: usize,
    start: usize,
    downstream: Option<Downstream<E>>,
}

impl<E: Element> Match<E> {
    /// Forwards one result element. Returns `false` once the downstream is
    /// served or stopped.
    fn forward(&mut self, element: E) -> bool {
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
}

impl<E: Element + PartialEq> IndexedFuturePredicate<E> for Match<E> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: E) -> bool {
        let slot = self
            .available
            .iter_mut()
            .find(|candidate| candidate.as_ref() == Some(&element));
        let matched = slot.map(Option::take).is_some();
        if self.operation.keeps_left(matched) {
            self.forward(element)
        } else {
            true
        }
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        if self.operation.keeps_right() {
            let remaining: Vec<E> = self.available.drain(..).flatten().collect();
            for element in remaining {
                if !self.forward(element) {
                    return;
                }
            }
        }
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.complete(self.produced),
            Some(Downstream::Scan(predicate)) => predicate.complete(self.produced),
            None => {}
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.error(error),
            Some(Downstream::Scan(predicate)) => predicate.error(error),
            None => {}
        }
    }
}

/// Splits `left` into the elements matched by `right` and the others.
fn partition<E: Clone + PartialEq>(left: &[E], right: &[E]) -> (Vec<E>, Vec<E>) {
    let mut available: Vec<Option<&E>> = right.iter().map(Some).collect();
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for element in left {
        let slot = available
            .iter_mut()
            .find(|candidate| candidate.is_some_and(|candidate| candidate == element));
        match slot {
            Some(slot) => {
                *slot = None;
                matched.push(element.clone());
            }
            None => unmatched.push(element.clone()),
        }
    }
    (matched, unmatched)
}
