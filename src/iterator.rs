//! The lazily materialized iterator façade.
//!
//! A [`FutureIterator`] is a single pass sequence: every element it serves is
//! consumed. Operations take the iterator by value and return a new one
//! reading from it, so a consumed upstream can never be observed twice.
//!
//! Operations dispatch the way [`FutureList`] ones do. Aggregations
//! (`fold_left`, `min`, `count`, ...) buffer the upstream into a random access
//! node, fold it, and iterate over the single result.
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::context::runtime::RuntimeContext;
//! use lazy_collections::iterator::FutureIterator;
//!
//! let context = RuntimeContext::new().into_shared();
//! let iterator = FutureIterator::of(context, vec![5, 3, 8, 1])
//!     .filter(|value| *value > 2)
//!     .take(2);
//! assert_eq!(iterator.next().unwrap(), 5);
//! assert_eq!(iterator.get().unwrap(), vec![3]);
//! assert!(!iterator.has_next().unwrap());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::blocking::Binding;
use crate::consumer::{BoxConsumer, Lookup, indexed_consumer};
use crate::context::{SharedContext, TaskId};
use crate::error::{PipelineError, PipelineResult};
use crate::list::{FutureList, slice_of};
use crate::materializer::iterator::{
    DropIteratorMaterializer, ListCursorIteratorMaterializer, MapIteratorMaterializer,
    ResidentIteratorMaterializer, Step, StepIteratorMaterializer, TakeIteratorMaterializer,
    TransformIteratorMaterializer,
};
use crate::materializer::list::{
    AppendAllListMaterializer, FoldDirection, FoldListMaterializer, IteratorListMaterializer,
    KeySet, Proceed, ResidentListMaterializer, normalize_bounds,
};
use crate::materializer::{Element, Elements, SharedIterator, SharedList, Status, add_sizes};
use crate::source::Source;

const ITERATOR: &str = "iterator";

/// A lazily computed single pass sequence.
pub struct FutureIterator<E: Element> {
    binding: Binding,
    materializer: SharedIterator<E>,
}

// =============================================================================
// Construction
// =============================================================================

impl<E: Element> FutureIterator<E> {
    /// An iterator over resident elements.
    #[must_use]
    pub fn of(context: SharedContext, elements: Vec<E>) -> Self {
        Self::from_materializer(context, Arc::new(ResidentIteratorMaterializer::new(elements)))
    }

    /// The empty iterator.
    #[must_use]
    pub fn empty(context: SharedContext) -> Self {
        Self::of(context, Vec::new())
    }

    /// Wraps a materializer into a new root façade with its own cancellation
    /// slot.
    #[must_use]
    pub fn from_materializer(context: SharedContext, materializer: SharedIterator<E>) -> Self {
        Self::from_parts(Binding::root(context, ITERATOR), materializer)
    }

    pub(crate) const fn from_parts(binding: Binding, materializer: SharedIterator<E>) -> Self {
        Self {
            binding,
            materializer,
        }
    }

    /// The materializer backing this façade.
    #[must_use]
    pub const fn materializer(&self) -> &SharedIterator<E> {
        &self.materializer
    }

    fn derive<F: Element>(&self, materializer: SharedIterator<F>) -> FutureIterator<F> {
        FutureIterator::from_parts(self.binding.derive(ITERATOR), materializer)
    }

    fn resident<F: Element>(&self, elements: Vec<F>) -> FutureIterator<F> {
        self.derive(Arc::new(ResidentIteratorMaterializer::new(elements)))
    }

    fn transform<F, T>(&self, known_size: Option<usize>, transform: T) -> FutureIterator<F>
    where
        F: Element,
        T: FnOnce(Elements<E>) -> Vec<F> + Send + 'static,
    {
        self.derive(Arc::new(TransformIteratorMaterializer::new(
            Arc::clone(&self.materializer),
            known_size,
            transform,
        )))
    }

    fn stepped<F, S>(&self, step: S) -> FutureIterator<F>
    where
        F: Element,
        S: FnMut(usize, E) -> Step<F> + Send + 'static,
    {
        self.derive(Arc::new(StepIteratorMaterializer::new(
            Arc::clone(&self.materializer),
            step,
        )))
    }

    /// The remaining elements, buffered for random access.
    fn buffered(&self) -> SharedList<E> {
        Arc::new(IteratorListMaterializer::new(Arc::clone(&self.materializer)))
    }

    /// Iterates over a list built on top of this iterator.
    fn cursor<F: Element>(&self, binding: Binding, list: SharedList<F>) -> FutureIterator<F> {
        FutureIterator::from_parts(binding, Arc::new(ListCursorIteratorMaterializer::new(list, 0)))
    }

    fn is_known_empty(&self) -> bool {
        self.known_size() == Some(0)
    }

    fn at_once(&self) -> bool {
        self.materializer.is_materialized_at_once()
    }
}

// =============================================================================
// Element-wise operations
// =============================================================================

impl<E: Element> FutureIterator<E> {
    /// Applies `mapper` to every element as it is consumed.
    #[must_use]
    pub fn map<F, M>(self, mapper: M) -> FutureIterator<F>
    where
        F: Element,
        M: Fn(E) -> F + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            return self.transform(self.known_size(), move |elements: Elements<E>| {
                elements.iter().cloned().map(mapper).collect()
            });
        }
        self.derive(Arc::new(MapIteratorMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::new(mapper),
        )))
    }

    /// Keeps the elements satisfying `condition`.
    #[must_use]
    pub fn filter<C>(self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self;
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .filter(|element| condition(element))
                    .cloned()
                    .collect()
            });
        }
        self.stepped(move |_, element| {
            if condition(&element) {
                Step::Emit(element)
            } else {
                Step::Skip
            }
        })
    }

    /// Skips the first `count` elements.
    #[must_use]
    pub fn drop(self, count: usize) -> Self {
        if count == 0 || self.is_known_empty() {
            return self;
        }
        if self.known_size().is_some_and(|size| size <= count) {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            let known_size = self.known_size().map(|size| size - count);
            return self.transform(known_size, move |elements: Elements<E>| {
                slice_of(&elements, count, elements.len())
            });
        }
        self.derive(Arc::new(DropIteratorMaterializer::new(
            Arc::clone(&self.materializer),
            count,
        )))
    }

    /// Keeps the first `count` elements.
    #[must_use]
    pub fn take(self, count: usize) -> Self {
        if count == 0 {
            return self.resident(Vec::new());
        }
        if self.known_size().is_some_and(|size| size <= count) {
            return self;
        }
        if self.at_once() {
            let known_size = self.known_size().map(|size| size.min(count));
            return self.transform(known_size, move |elements: Elements<E>| {
                slice_of(&elements, 0, count)
            });
        }
        self.derive(Arc::new(TakeIteratorMaterializer::new(
            Arc::clone(&self.materializer),
            count,
        )))
    }

    /// Keeps the leading elements satisfying `condition`.
    #[must_use]
    pub fn take_while<C>(self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self;
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .take_while(|element| condition(element))
                    .cloned()
                    .collect()
            });
        }
        self.stepped(move |_, element| {
            if condition(&element) {
                Step::Emit(element)
            } else {
                Step::Stop
            }
        })
    }

    /// Skips the leading elements satisfying `condition`.
    #[must_use]
    pub fn drop_while<C>(self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self;
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .skip_while(|element| condition(element))
                    .cloned()
                    .collect()
            });
        }
        let mut dropping = true;
        self.stepped(move |_, element| {
            if dropping && condition(&element) {
                Step::Skip
            } else {
                dropping = false;
                Step::Emit(element)
            }
        })
    }

    /// The remaining elements from `start` (inclusive) to `end` (exclusive).
    ///
    /// Negative bounds count from the end, which requires the whole
    /// remainder to be known first.
    #[must_use]
    pub fn slice(self, start: isize, end: isize) -> Self {
        if start >= 0 && end >= 0 {
            let (from, to) = (start.unsigned_abs(), end.unsigned_abs());
            return self.drop(from).take(to.saturating_sub(from));
        }
        if let Some(size) = self.known_size() {
            let (from, to) = normalize_bounds(start, end, size);
            return self.drop(from).take(to - from);
        }
        self.transform(None, move |elements: Elements<E>| {
            let (from, to) = normalize_bounds(start, end, elements.len());
            slice_of(&elements, from, to)
        })
    }

    /// Removes duplicate elements, keeping first occurrences.
    #[must_use]
    pub fn distinct(self) -> Self
    where
        E: Hash + Eq,
    {
        self.distinct_by(E::clone)
    }

    /// Removes elements whose key was already seen.
    #[must_use]
    pub fn distinct_by<K, F>(self, key: F) -> Self
    where
        K: Hash + Eq + Send + Sync + 'static,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        if self.known_size().is_some_and(|size| size <= 1) {
            return self;
        }
        let mut seen = KeySet::default();
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .filter(|element| seen.insert(key(element)))
                    .cloned()
                    .collect()
            });
        }
        self.stepped(move |_, element| {
            if seen.insert(key(&element)) {
                Step::Emit(element)
            } else {
                Step::Skip
            }
        })
    }

    /// Continues with the elements of `source` once this iterator is
    /// exhausted.
    #[must_use]
    pub fn append_all(self, source: impl Into<Source<E>>) -> Self {
        match source.into() {
            Source::Resident(elements) => {
                if elements.is_empty() {
                    return self;
                }
                if self.at_once() {
                    let known_size = add_sizes(self.known_size(), Some(elements.len()));
                    return self.transform(known_size, move |head: Elements<E>| {
                        head.iter().chain(elements.iter()).cloned().collect()
                    });
                }
                let appended = Arc::new(AppendAllListMaterializer::new(
                    self.buffered(),
                    Arc::new(ResidentListMaterializer::from_shared(elements)),
                ));
                self.cursor(self.binding.derive(ITERATOR), appended)
            }
            Source::List(list) => {
                if list.known_size() == Some(0) {
                    return self;
                }
                let appended = Arc::new(AppendAllListMaterializer::new(
                    self.buffered(),
                    list.switched_to(&self.binding),
                ));
                self.cursor(self.binding.detach(ITERATOR), appended)
            }
        }
    }

    /// The remaining elements as a list.
    #[must_use]
    pub fn to_list(self) -> FutureList<E> {
        FutureList::from_parts(self.binding.derive("list"), self.buffered())
    }
}

// =============================================================================
// Aggregations
// =============================================================================

impl<E: Element> FutureIterator<E> {
    fn fold<A, C>(self, identity: A, combine: C, proceed: Option<Proceed<A>>) -> FutureIterator<A>
    where
        A: Element,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.resident(vec![identity]);
        }
        let folded = Arc::new(FoldListMaterializer::new(
            self.buffered(),
            FoldDirection::Left,
            identity,
            Arc::new(combine),
            proceed,
        ));
        self.cursor(self.binding.derive(ITERATOR), folded)
    }

    /// A single element iterator over the fold of the remaining elements.
    #[must_use]
    pub fn fold_left<A, C>(self, identity: A, combine: C) -> FutureIterator<A>
    where
        A: Element,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        self.fold(identity, combine, None)
    }

    /// Like [`FutureIterator::fold_left`], but stops consuming as soon as the
    /// accumulator no longer satisfies `condition`.
    #[must_use]
    pub fn fold_left_while<A, P, C>(self, identity: A, condition: P, combine: C) -> FutureIterator<A>
    where
        A: Element,
        P: Fn(&A) -> bool + Send + Sync + 'static,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        let proceed: Proceed<A> = Arc::new(condition);
        self.fold(identity, combine, Some(proceed))
    }

    fn reduce<C>(self, combine: C) -> Self
    where
        C: Fn(E, E) -> E + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self;
        }
        if self.at_once() {
            let known_size = self.known_size().map(|size| size.min(1));
            return self.transform(known_size, move |elements: Elements<E>| {
                elements.iter().cloned().reduce(combine).into_iter().collect()
            });
        }
        let reduce = move |reduced: Option<E>, element| {
            Some(match reduced {
                Some(reduced) => combine(reduced, element),
                None => element,
            })
        };
        self.fold(None, reduce, None)
            .stepped(|_, reduced: Option<E>| reduced.map_or(Step::Skip, Step::Emit))
    }

    /// The first smallest remaining element according to `compare`, if any.
    #[must_use]
    pub fn min_by<C>(self, compare: C) -> Self
    where
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        self.reduce(move |smallest, element| {
            if compare(&element, &smallest) == Ordering::Less {
                element
            } else {
                smallest
            }
        })
    }

    /// The first largest remaining element according to `compare`, if any.
    #[must_use]
    pub fn max_by<C>(self, compare: C) -> Self
    where
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        self.reduce(move |largest, element| {
            if compare(&element, &largest) == Ordering::Greater {
                element
            } else {
                largest
            }
        })
    }

    /// The smallest remaining element, if any.
    #[must_use]
    pub fn min(self) -> Self
    where
        E: Ord,
    {
        self.min_by(Ord::cmp)
    }

    /// The largest remaining element, if any.
    #[must_use]
    pub fn max(self) -> Self
    where
        E: Ord,
    {
        self.max_by(Ord::cmp)
    }

    /// A single element iterator with the number of remaining elements
    /// satisfying `condition`.
    #[must_use]
    pub fn count<C>(self, condition: C) -> FutureIterator<usize>
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.fold_left(0, move |count, element| {
            if condition(&element) { count + 1 } else { count }
        })
    }

    /// The first remaining element satisfying `condition`, if any.
    #[must_use]
    pub fn find_first<C>(self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.filter(condition).take(1)
    }
}

// =============================================================================
// Blocking access
// =============================================================================

impl<E: Element> FutureIterator<E> {
    /// Blocks until the next element is available and consumes it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchElement`] once the iterator is
    /// exhausted, or the failure or cancellation of the pipeline.
    pub fn next(&self) -> PipelineResult<E> {
        if self.is_known_empty() && !self.binding.is_cancelled() {
            return Err(PipelineError::NoSuchElement);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_next(),
            None,
            move |target: BoxConsumer<E>| {
                materializer.materialize_next(indexed_consumer(
                    move |result: PipelineResult<Lookup<E>>| match result {
                        Ok(Lookup::Found { element, .. }) => target.accept(element),
                        Ok(Lookup::Complete { .. }) => target.error(PipelineError::NoSuchElement),
                        Err(error) => target.error(error),
                    },
                ));
            },
        )
    }

    /// Blocks until it is known whether another element follows. Nothing is
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn has_next(&self) -> PipelineResult<bool> {
        if self.is_known_empty() && !self.binding.is_cancelled() {
            return Ok(false);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_has_next(),
            None,
            move |target| materializer.materialize_has_next(target),
        )
    }

    /// Consumes up to `count` elements and returns how many were skipped.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn skip(&self, count: usize) -> PipelineResult<usize> {
        if count == 0 {
            return Ok(0);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_skip(),
            None,
            move |target| materializer.materialize_skip(count, target),
        )
    }

    fn remaining(&self, timeout: Option<Duration>) -> PipelineResult<Vec<E>> {
        let materializer = Arc::clone(&self.materializer);
        self.binding
            .wait(
                self.materializer.is_done(),
                self.materializer.weight_elements(),
                timeout,
                move |target| materializer.materialize_elements(target),
            )
            .map(Arc::unwrap_or_clone)
    }

    /// Blocks until every remaining element is available and consumes them.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn get(&self) -> PipelineResult<Vec<E>> {
        self.remaining(None)
    }

    /// Like [`FutureIterator::get`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] when the deadline elapses.
    pub fn get_timeout(&self, timeout: Duration) -> PipelineResult<Vec<E>> {
        self.remaining(Some(timeout))
    }
}

// =============================================================================
// Control
// =============================================================================

impl<E: Element> FutureIterator<E> {
    /// Requests cancellation of the whole chain.
    ///
    /// Returns `false` when the iterator is already done or another
    /// cancellation won.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let materializer = Arc::clone(&self.materializer);
        self.binding.cancel(
            self.materializer.is_done(),
            may_interrupt,
            move |signal| materializer.materialize_cancel(signal),
        )
    }

    /// Returns `true` if the chain was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.binding.is_cancelled() || self.materializer.is_cancelled()
    }

    /// Returns `true` once the iterator succeeded, failed or was cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.binding.is_cancelled() || self.materializer.is_done()
    }

    /// Returns `true` if the computation failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.binding.is_cancelled() && self.materializer.is_failed()
    }

    /// Returns `true` if the upstream result is available.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        !self.binding.is_cancelled() && self.materializer.is_succeeded()
    }

    /// The number of remaining elements, when it can be told without work.
    #[must_use]
    pub fn known_size(&self) -> Option<usize> {
        self.materializer.known_size()
    }

    /// Returns `true` if the remaining elements are resident.
    #[must_use]
    pub fn is_materialized_at_once(&self) -> bool {
        self.materializer.is_materialized_at_once()
    }

    /// The id under which this iterator schedules its work.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        self.binding.task_id()
    }

    /// The execution context this iterator runs on.
    #[must_use]
    pub const fn context(&self) -> &SharedContext {
        self.binding.context()
    }
}

impl<E: Element> fmt::Debug for FutureIterator<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.binding.is_cancelled() {
            Status::Cancelled
        } else {
            self.materializer.status()
        };
        formatter
            .debug_struct("FutureIterator")
            .field("task_id", self.task_id())
            .field("known_size", &self.known_size())
            .field("status", &status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::inline::InlineContext;
    use crate::materializer::IteratorMaterializer;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn context() -> SharedContext {
        InlineContext::new().into_shared()
    }

    /// An iterator that is not materialized at once, so incremental nodes
    /// are used.
    fn streaming(values: Vec<i32>) -> FutureIterator<i32> {
        let resident: SharedIterator<i32> = Arc::new(ResidentIteratorMaterializer::new(values));
        let lazy: SharedIterator<i32> = Arc::new(Streaming(resident));
        FutureIterator::from_materializer(context(), lazy)
    }

    /// Hides the at-once flag of the wrapped iterator.
    struct Streaming(SharedIterator<i32>);

    impl IteratorMaterializer<i32> for Streaming {
        fn known_size(&self) -> Option<usize> {
            None
        }

        fn is_materialized_at_once(&self) -> bool {
            false
        }

        fn status(&self) -> Status {
            Status::Pending
        }

        fn materialize_cancel(&self, signal: &crate::error::CancellationSignal) {
            self.0.materialize_cancel(signal);
        }

        fn materialize_has_next(&self, target: BoxConsumer<bool>) {
            self.0.materialize_has_next(target);
        }

        fn materialize_next(&self, target: crate::consumer::BoxIndexedConsumer<i32>) {
            self.0.materialize_next(target);
        }

        fn materialize_next_while(&self, predicate: crate::consumer::BoxPredicate<i32>) {
            self.0.materialize_next_while(predicate);
        }

        fn materialize_elements(&self, target: BoxConsumer<Elements<i32>>) {
            self.0.materialize_elements(target);
        }

        fn weight_next(&self) -> usize {
            1
        }

        fn weight_elements(&self) -> usize {
            1
        }
    }

    #[rstest]
    #[case::resident(FutureIterator::of(context(), vec![1, 2, 3, 4, 5, 6]))]
    #[case::streaming(streaming(vec![1, 2, 3, 4, 5, 6]))]
    fn operations_agree_on_both_paths(#[case] iterator: FutureIterator<i32>) {
        let result = iterator
            .filter(|value| value % 2 == 0)
            .map(|value| value * 10)
            .drop(1)
            .get();
        assert_eq!(result, Ok(vec![40, 60]));
    }

    #[rstest]
    #[case::resident(FutureIterator::of(context(), vec![3, 9, 2, 9, 1]))]
    #[case::streaming(streaming(vec![3, 9, 2, 9, 1]))]
    fn aggregations(#[case] iterator: FutureIterator<i32>) {
        let values = iterator.to_list();
        assert_eq!(values.iterator().max().get(), Ok(vec![9]));
        assert_eq!(values.iterator().min().get(), Ok(vec![1]));
        assert_eq!(values.iterator().count(|value| *value == 9).get(), Ok(vec![2]));
        assert_eq!(values.iterator().distinct().get(), Ok(vec![3, 9, 2, 1]));
        assert_eq!(values.iterator().take_while(|value| *value > 2).get(), Ok(vec![3, 9]));
        assert_eq!(values.iterator().drop_while(|value| *value > 2).get(), Ok(vec![2, 9, 1]));
        assert_eq!(values.iterator().slice(1, -1).get(), Ok(vec![9, 2, 9]));
        assert_eq!(values.iterator().find_first(|value| *value < 3).get(), Ok(vec![2]));
    }

    #[rstest]
    fn min_and_max_of_streaming_input() {
        assert_eq!(streaming(vec![4, 7, 2]).max().get(), Ok(vec![7]));
        assert_eq!(streaming(vec![4, 7, 2]).min().get(), Ok(vec![2]));
        assert_eq!(streaming(Vec::new()).max().get(), Ok(Vec::<i32>::new()));
    }

    #[rstest]
    fn fold_while_stops_pulling() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let counted: SharedIterator<i32> = Arc::new(MapIteratorMaterializer::<i32, i32>::new(
            Arc::new(ResidentIteratorMaterializer::new(vec![1, 2, 3, 4, 5])),
            Arc::new(move |value: i32| {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                value
            }),
        ));
        let sum = FutureIterator::from_materializer(context(), counted)
            .fold_left_while(0, |sum| *sum < 3, |sum, value| sum + value)
            .get();
        assert_eq!(sum, Ok(vec![3]));
        assert_eq!(pulled.load(AtomicOrdering::SeqCst), 2);
    }

    #[rstest]
    fn next_consumes_and_reports_exhaustion() {
        let iterator = streaming(vec![1, 2]);
        assert_eq!(iterator.next(), Ok(1));
        assert_eq!(iterator.has_next(), Ok(true));
        assert_eq!(iterator.skip(5), Ok(1));
        assert_eq!(iterator.has_next(), Ok(false));
        assert_eq!(iterator.next(), Err(PipelineError::NoSuchElement));
    }

    #[rstest]
    fn append_all_continues_with_the_argument() {
        let list = FutureList::of(context(), vec![3, 4]);
        assert_eq!(streaming(vec![1, 2]).append_all(vec![9]).get(), Ok(vec![1, 2, 9]));
        assert_eq!(streaming(vec![1, 2]).append_all(&list).get(), Ok(vec![1, 2, 3, 4]));
        assert_eq!(
            FutureIterator::of(context(), vec![1]).append_all(vec![2]).known_size(),
            Some(2)
        );
    }
}
