//! The lazily materialized list façade.
//!
//! A [`FutureList`] is an immutable, random access sequence whose content is
//! computed on demand by a chain of [materializers](crate::materializer). Every
//! operation returns immediately with a new façade; nothing runs until a
//! blocking accessor ([`FutureList::get`], [`FutureList::size`], ...) or a
//! non-blocking one ([`FutureList::non_blocking_get`]) asks for data.
//!
//! # Dispatch
//!
//! Each operation picks the cheapest node it can prove correct from the
//! upstream's known size and at-once flag alone:
//!
//! 1. when the known sizes make the operation a no-op, the upstream (or an
//!    empty list) is returned and no node is built;
//! 2. when the upstream is materialized at once and any argument is resident,
//!    a [`TransformListMaterializer`] computes the whole result in one go;
//! 3. otherwise an incremental node keeps partial evaluation possible.
//!
//! An argument list bound to another execution context is wrapped in a
//! [`SwitchListMaterializer`] so that its work keeps running on its own
//! context.
//!
//! # Cancellation
//!
//! Façades derived from one another share a cancellation slot: cancelling any
//! of them wakes every blocked caller of the chain. Operations combining two
//! lists give the result a fresh slot.
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::context::runtime::RuntimeContext;
//! use lazy_collections::list::FutureList;
//!
//! let context = RuntimeContext::new().into_shared();
//! let list = FutureList::of(context, vec![1, 2, 3, 4, 5])
//!     .filter(|value| value % 2 == 0)
//!     .map(|value| value * 10);
//! assert_eq!(list.get().unwrap(), vec![20, 40]);
//! assert_eq!(list.size().unwrap(), 2);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::blocking::Binding;
use crate::consumer::{
    BoxConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, indexed_consumer,
};
use crate::context::{SharedContext, TaskId, is_same_context};
use crate::error::{PipelineError, PipelineResult};
use crate::iterator::FutureIterator;
use crate::list_iterator::FutureListIterator;
use crate::materializer::iterator::{ListCursorIteratorMaterializer, Step, StepIteratorMaterializer};
use crate::materializer::list::{
    AppendAllListMaterializer, DistinctByListMaterializer, DropListMaterializer,
    FilterListMaterializer, FlatMapListMaterializer, FoldDirection, FoldListMaterializer,
    IteratorListMaterializer, MapListMaterializer, PaddedSplitter, Proceed,
    ResidentListMaterializer, ReversedListMaterializer, SetOperation,
    SetOperationListMaterializer, SliceListMaterializer, SlidingWindowListMaterializer,
    SortedListMaterializer, Splitter, SwitchListMaterializer, TakeListMaterializer,
    TransformListMaterializer, UnpaddedSplitter, normalize_bounds, window_count, windows,
};
use crate::materializer::{
    Element, Elements, SharedIterator, SharedList, Status, add_sizes, materialize_contains,
};
use crate::source::Source;

const LIST: &str = "list";

/// Copies `elements[from..to]`, or nothing when the range is empty.
pub(crate) fn slice_of<E: Clone>(elements: &[E], from: usize, to: usize) -> Vec<E> {
    elements
        .get(from..to.min(elements.len()))
        .map_or_else(Vec::new, <[E]>::to_vec)
}

/// The slice bound `count` elements before the end.
fn from_end(count: usize) -> isize {
    isize::try_from(count).map_or(isize::MIN, |count| -count)
}

/// A lazily computed immutable list.
pub struct FutureList<E: Element> {
    binding: Binding,
    materializer: SharedList<E>,
}

// =============================================================================
// Construction
// =============================================================================

impl<E: Element> FutureList<E> {
    /// A list of resident elements.
    #[must_use]
    pub fn of(context: SharedContext, elements: Vec<E>) -> Self {
        Self::from_materializer(context, Arc::new(ResidentListMaterializer::new(elements)))
    }

    /// The empty list.
    #[must_use]
    pub fn empty(context: SharedContext) -> Self {
        Self::of(context, Vec::new())
    }

    /// Wraps a materializer into a new root façade with its own cancellation
    /// slot.
    #[must_use]
    pub fn from_materializer(context: SharedContext, materializer: SharedList<E>) -> Self {
        Self::from_parts(Binding::root(context, LIST), materializer)
    }

    pub(crate) const fn from_parts(binding: Binding, materializer: SharedList<E>) -> Self {
        Self {
            binding,
            materializer,
        }
    }

    /// The same list, materialized through `context`.
    ///
    /// The current materializer keeps running on its own context; results
    /// are bridged back. The returned façade has a fresh cancellation slot.
    #[must_use]
    pub fn with_context(&self, context: SharedContext) -> Self {
        if is_same_context(&context, self.context()) {
            return self.clone();
        }
        let binding = Binding::root(context, LIST);
        let switched = SwitchListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::clone(binding.context()),
            binding.task_id().clone(),
            Arc::clone(self.context()),
            self.task_id().clone(),
        );
        Self::from_parts(binding, Arc::new(switched))
    }

    pub(crate) const fn binding(&self) -> &Binding {
        &self.binding
    }

    /// The materializer backing this façade.
    #[must_use]
    pub const fn materializer(&self) -> &SharedList<E> {
        &self.materializer
    }

    /// A façade derived from this one, sharing its cancellation slot.
    fn derive<F: Element>(&self, materializer: SharedList<F>) -> FutureList<F> {
        FutureList::from_parts(self.binding.derive(LIST), materializer)
    }

    /// A façade combining this list with an argument, with a fresh slot.
    fn combine<F: Element>(&self, materializer: SharedList<F>) -> FutureList<F> {
        FutureList::from_parts(self.binding.detach(LIST), materializer)
    }

    fn resident<F: Element>(&self, elements: Vec<F>) -> FutureList<F> {
        self.derive(Arc::new(ResidentListMaterializer::new(elements)))
    }

    fn transform<F, T>(&self, known_size: Option<usize>, transform: T) -> FutureList<F>
    where
        F: Element,
        T: FnOnce(Elements<E>) -> Vec<F> + Send + 'static,
    {
        self.derive(Arc::new(TransformListMaterializer::new(
            Arc::clone(&self.materializer),
            known_size,
            transform,
        )))
    }

    /// Runs a step function over the list, element by element.
    fn stepped<F, S>(&self, step: S) -> FutureList<F>
    where
        F: Element,
        S: FnMut(usize, E) -> Step<F> + Send + 'static,
    {
        let cursor: SharedIterator<E> = Arc::new(ListCursorIteratorMaterializer::new(
            Arc::clone(&self.materializer),
            0,
        ));
        let stepped: SharedIterator<F> = Arc::new(StepIteratorMaterializer::new(cursor, step));
        self.derive(Arc::new(IteratorListMaterializer::new(stepped)))
    }

    /// The materializer of an argument list, switched to its own context
    /// when it runs elsewhere.
    fn argument(&self, list: &Self) -> SharedList<E> {
        list.switched_to(&self.binding)
    }

    /// This list's materializer as seen from a façade bound to `local`.
    pub(crate) fn switched_to(&self, local: &Binding) -> SharedList<E> {
        if local.shares_context(&self.binding) {
            return Arc::clone(&self.materializer);
        }
        Arc::new(SwitchListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::clone(local.context()),
            local.task_id().clone(),
            Arc::clone(self.context()),
            self.task_id().clone(),
        ))
    }

    fn is_known_empty(&self) -> bool {
        self.known_size() == Some(0)
    }

    fn is_at_most_one(&self) -> bool {
        self.known_size().is_some_and(|size| size <= 1)
    }

    fn at_once(&self) -> bool {
        self.materializer.is_materialized_at_once()
    }
}

// =============================================================================
// Element-wise operations
// =============================================================================

impl<E: Element> FutureList<E> {
    /// Applies `mapper` to every element.
    #[must_use]
    pub fn map<F, M>(&self, mapper: M) -> FutureList<F>
    where
        F: Element,
        M: Fn(E) -> F + Send + Sync + 'static,
    {
        self.map_indexed(move |_, element| mapper(element))
    }

    /// Applies `mapper` to every element and its index.
    #[must_use]
    pub fn map_indexed<F, M>(&self, mapper: M) -> FutureList<F>
    where
        F: Element,
        M: Fn(usize, E) -> F + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            return self.transform(self.known_size(), move |elements: Elements<E>| {
                elements
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(index, element)| mapper(index, element))
                    .collect()
            });
        }
        self.derive(Arc::new(MapListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::new(mapper),
        )))
    }

    /// Keeps the elements satisfying `condition`.
    #[must_use]
    pub fn filter<C>(&self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.filter_indexed(move |_, element| condition(element))
    }

    /// Keeps the elements satisfying `condition`, given their index.
    #[must_use]
    pub fn filter_indexed<C>(&self, condition: C) -> Self
    where
        C: Fn(usize, &E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.clone();
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .enumerate()
                    .filter(|(index, element)| condition(*index, element))
                    .map(|(_, element)| element.clone())
                    .collect()
            });
        }
        self.derive(Arc::new(FilterListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::new(condition),
        )))
    }

    /// Applies `mapper` to every element and concatenates the results.
    #[must_use]
    pub fn flat_map<F, I, M>(&self, mapper: M) -> FutureList<F>
    where
        F: Element,
        I: IntoIterator<Item = F>,
        M: Fn(E) -> I + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements.iter().cloned().flat_map(mapper).collect()
            });
        }
        self.derive(Arc::new(FlatMapListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::new(move |element: E| -> Vec<F> { mapper(element).into_iter().collect() }),
        )))
    }
}

// =============================================================================
// Dropping and taking
// =============================================================================

impl<E: Element> FutureList<E> {
    /// Skips the first `count` elements.
    #[must_use]
    pub fn drop(&self, count: usize) -> Self {
        if count == 0 || self.is_known_empty() {
            return self.clone();
        }
        if self.known_size().is_some_and(|size| count >= size) {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            let known_size = self.known_size().map(|size| size - count);
            return self.transform(known_size, move |elements: Elements<E>| {
                slice_of(&elements, count, elements.len())
            });
        }
        self.derive(Arc::new(DropListMaterializer::new(
            Arc::clone(&self.materializer),
            count,
        )))
    }

    /// Skips the last `count` elements.
    #[must_use]
    pub fn drop_right(&self, count: usize) -> Self {
        if count == 0 || self.is_known_empty() {
            return self.clone();
        }
        if let Some(size) = self.known_size() {
            return self.take(size.saturating_sub(count));
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                slice_of(&elements, 0, elements.len().saturating_sub(count))
            });
        }
        self.slice(0, from_end(count))
    }

    /// Skips the leading elements satisfying `condition`.
    #[must_use]
    pub fn drop_while<C>(&self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.clone();
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

    /// Keeps the first `count` elements.
    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        if count == 0 {
            return self.resident(Vec::new());
        }
        if self.known_size().is_some_and(|size| size <= count) {
            return self.clone();
        }
        if self.at_once() {
            let known_size = self.known_size().map(|size| size.min(count));
            return self.transform(known_size, move |elements: Elements<E>| {
                slice_of(&elements, 0, count)
            });
        }
        self.derive(Arc::new(TakeListMaterializer::new(
            Arc::clone(&self.materializer),
            count,
        )))
    }

    /// Keeps the last `count` elements.
    #[must_use]
    pub fn take_right(&self, count: usize) -> Self {
        if count == 0 {
            return self.resident(Vec::new());
        }
        if let Some(size) = self.known_size() {
            return self.drop(size.saturating_sub(count));
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                slice_of(&elements, elements.len().saturating_sub(count), elements.len())
            });
        }
        self.slice(from_end(count), isize::MAX)
    }

    /// Keeps the leading elements satisfying `condition`.
    #[must_use]
    pub fn take_while<C>(&self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.clone();
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

    /// The elements from `start` (inclusive) to `end` (exclusive).
    ///
    /// Negative bounds count from the end of the list and every bound is
    /// clamped into `[0, size]`.
    #[must_use]
    pub fn slice(&self, start: isize, end: isize) -> Self {
        let Some(size) = self.known_size() else {
            return self.derive(Arc::new(SliceListMaterializer::new(
                Arc::clone(&self.materializer),
                start,
                end,
            )));
        };
        let (from, to) = normalize_bounds(start, end, size);
        if from >= to {
            return self.resident(Vec::new());
        }
        if from == 0 && to == size {
            return self.clone();
        }
        if self.at_once() {
            return self.transform(Some(to - from), move |elements: Elements<E>| {
                slice_of(&elements, from, to)
            });
        }
        self.drop(from).take(to - from)
    }
}

// =============================================================================
// Concatenation
// =============================================================================

impl<E: Element> FutureList<E> {
    /// Appends one element.
    #[must_use]
    pub fn append(&self, element: E) -> Self {
        self.append_all(vec![element])
    }

    /// Appends every element of `source`.
    #[must_use]
    pub fn append_all(&self, source: impl Into<Source<E>>) -> Self {
        match source.into() {
            Source::Resident(elements) => {
                if elements.is_empty() {
                    return self.clone();
                }
                if self.at_once() {
                    let known_size = add_sizes(self.known_size(), Some(elements.len()));
                    return self.transform(known_size, move |head: Elements<E>| {
                        head.iter().chain(elements.iter()).cloned().collect()
                    });
                }
                self.derive(Arc::new(AppendAllListMaterializer::new(
                    Arc::clone(&self.materializer),
                    Arc::new(ResidentListMaterializer::from_shared(elements)),
                )))
            }
            Source::List(list) => {
                if list.is_known_empty() {
                    return self.clone();
                }
                self.combine(Arc::new(AppendAllListMaterializer::new(
                    Arc::clone(&self.materializer),
                    self.argument(&list),
                )))
            }
        }
    }

    /// Prepends one element.
    #[must_use]
    pub fn prepend(&self, element: E) -> Self {
        self.prepend_all(vec![element])
    }

    /// Prepends every element of `source`.
    #[must_use]
    pub fn prepend_all(&self, source: impl Into<Source<E>>) -> Self {
        match source.into() {
            Source::Resident(elements) => {
                if elements.is_empty() {
                    return self.clone();
                }
                if self.at_once() {
                    let known_size = add_sizes(Some(elements.len()), self.known_size());
                    return self.transform(known_size, move |tail: Elements<E>| {
                        elements.iter().chain(tail.iter()).cloned().collect()
                    });
                }
                self.derive(Arc::new(AppendAllListMaterializer::prepended(
                    Arc::new(ResidentListMaterializer::from_shared(elements)),
                    Arc::clone(&self.materializer),
                )))
            }
            Source::List(list) => {
                if list.is_known_empty() {
                    return self.clone();
                }
                self.combine(Arc::new(AppendAllListMaterializer::prepended(
                    self.argument(&list),
                    Arc::clone(&self.materializer),
                )))
            }
        }
    }
}

// =============================================================================
// Folding
// =============================================================================

impl<E: Element> FutureList<E> {
    fn fold<A, C>(
        &self,
        direction: FoldDirection,
        identity: A,
        combine: C,
        proceed: Option<Proceed<A>>,
    ) -> FutureList<A>
    where
        A: Element,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.resident(vec![identity]);
        }
        self.derive(Arc::new(FoldListMaterializer::new(
            Arc::clone(&self.materializer),
            direction,
            identity,
            Arc::new(combine),
            proceed,
        )))
    }

    /// A single element list holding the fold of the elements, first to
    /// last.
    #[must_use]
    pub fn fold_left<A, C>(&self, identity: A, combine: C) -> FutureList<A>
    where
        A: Element,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        self.fold(FoldDirection::Left, identity, combine, None)
    }

    /// A single element list holding the fold of the elements, last to
    /// first.
    #[must_use]
    pub fn fold_right<A, C>(&self, identity: A, combine: C) -> FutureList<A>
    where
        A: Element,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        self.fold(FoldDirection::Right, identity, combine, None)
    }

    /// Like [`FutureList::fold_left`], but stops as soon as the accumulator
    /// no longer satisfies `condition`. Remaining elements are never
    /// requested.
    #[must_use]
    pub fn fold_left_while<A, P, C>(&self, identity: A, condition: P, combine: C) -> FutureList<A>
    where
        A: Element,
        P: Fn(&A) -> bool + Send + Sync + 'static,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        let proceed: Proceed<A> = Arc::new(condition);
        self.fold(FoldDirection::Left, identity, combine, Some(proceed))
    }

    /// Like [`FutureList::fold_right`], but stops as soon as the accumulator
    /// no longer satisfies `condition`.
    #[must_use]
    pub fn fold_right_while<A, P, C>(
        &self,
        identity: A,
        condition: P,
        combine: C,
    ) -> FutureList<A>
    where
        A: Element,
        P: Fn(&A) -> bool + Send + Sync + 'static,
        C: Fn(A, E) -> A + Send + Sync + 'static,
    {
        let proceed: Proceed<A> = Arc::new(condition);
        self.fold(FoldDirection::Right, identity, combine, Some(proceed))
    }

    /// Combines the elements pairwise from the first; empty for an empty
    /// list.
    #[must_use]
    pub fn reduce_left<C>(&self, combine: C) -> Self
    where
        C: Fn(E, E) -> E + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.clone();
        }
        if self.at_once() {
            let known_size = self.known_size().map(|size| size.min(1));
            return self.transform(known_size, move |elements: Elements<E>| {
                elements.iter().cloned().reduce(combine).into_iter().collect()
            });
        }
        self.fold(
            FoldDirection::Left,
            None,
            move |reduced: Option<E>, element: E| {
                Some(match reduced {
                    Some(reduced) => combine(reduced, element),
                    None => element,
                })
            },
            None,
        )
        .stepped(|_, reduced: Option<E>| reduced.map_or(Step::Skip, Step::Emit))
    }

    /// The first smallest element according to `compare`, if any.
    #[must_use]
    pub fn min_by<C>(&self, compare: C) -> Self
    where
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        self.reduce_left(move |smallest, element| {
            if compare(&element, &smallest) == Ordering::Less {
                element
            } else {
                smallest
            }
        })
    }

    /// The first largest element according to `compare`, if any.
    #[must_use]
    pub fn max_by<C>(&self, compare: C) -> Self
    where
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        self.reduce_left(move |largest, element| {
            if compare(&element, &largest) == Ordering::Greater {
                element
            } else {
                largest
            }
        })
    }

    /// The smallest element, if any.
    #[must_use]
    pub fn min(&self) -> Self
    where
        E: Ord,
    {
        self.min_by(Ord::cmp)
    }

    /// The largest element, if any.
    #[must_use]
    pub fn max(&self) -> Self
    where
        E: Ord,
    {
        self.max_by(Ord::cmp)
    }

    /// A single element list with the number of elements satisfying
    /// `condition`.
    #[must_use]
    pub fn count<C>(&self, condition: C) -> FutureList<usize>
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.fold_left(0, move |count, element| {
            if condition(&element) { count + 1 } else { count }
        })
    }

    /// A single element list telling whether any element satisfies
    /// `condition`. The scan stops at the first match.
    #[must_use]
    pub fn exists<C>(&self, condition: C) -> FutureList<bool>
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.fold_left_while(false, |found| !*found, move |_, element| condition(&element))
    }

    /// A single element list telling whether every element satisfies
    /// `condition`. The scan stops at the first mismatch.
    #[must_use]
    pub fn each<C>(&self, condition: C) -> FutureList<bool>
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.fold_left_while(true, |all| *all, move |_, element| condition(&element))
    }
}

// =============================================================================
// Searching
// =============================================================================

impl<E: Element> FutureList<E> {
    /// The first element satisfying `condition`, if any.
    #[must_use]
    pub fn find_first<C>(&self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.clone();
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .find(|element| condition(element))
                    .cloned()
                    .into_iter()
                    .collect()
            });
        }
        self.filter(condition).take(1)
    }

    /// The last element satisfying `condition`, if any.
    #[must_use]
    pub fn find_last<C>(&self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.clone();
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .rev()
                    .find(|element| condition(element))
                    .cloned()
                    .into_iter()
                    .collect()
            });
        }
        self.fold_right_while(
            None,
            |found: &Option<E>| found.is_none(),
            move |_, element: E| condition(&element).then_some(element),
        )
        .stepped(|_, found: Option<E>| found.map_or(Step::Skip, Step::Emit))
    }

    /// The index of the first element equal to `element`, if any.
    #[must_use]
    pub fn index_of(&self, element: E) -> FutureList<usize>
    where
        E: PartialEq,
    {
        self.index_where(move |candidate| *candidate == element)
    }

    /// The index of the last element equal to `element`, if any.
    #[must_use]
    pub fn last_index_of(&self, element: E) -> FutureList<usize>
    where
        E: PartialEq,
    {
        if self.is_known_empty() {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements
                    .iter()
                    .rposition(|candidate| *candidate == element)
                    .into_iter()
                    .collect()
            });
        }
        self.map_indexed(|index, element| (index, element))
            .find_last(move |(_, candidate)| *candidate == element)
            .map(|(index, _)| index)
    }

    /// The index of the first element satisfying `condition`, if any.
    #[must_use]
    pub fn index_where<C>(&self, condition: C) -> FutureList<usize>
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        if self.is_known_empty() {
            return self.resident(Vec::new());
        }
        if self.at_once() {
            return self.transform(None, move |elements: Elements<E>| {
                elements.iter().position(|element| condition(element)).into_iter().collect()
            });
        }
        self.map_indexed(|index, element| (index, element))
            .find_first(move |(_, element)| condition(element))
            .map(|(index, _)| index)
    }

    /// A single element list telling whether every element of `source` is
    /// contained in this list.
    #[must_use]
    pub fn includes(&self, source: impl Into<Source<E>>) -> FutureList<bool>
    where
        E: PartialEq,
    {
        let source = source.into();
        if source.is_known_empty() {
            return self.resident(vec![true]);
        }
        match source {
            Source::Resident(right) if self.at_once() => {
                self.transform(Some(1), move |left: Elements<E>| vec![contains_all(&left, &right)])
            }
            Source::Resident(right) => self
                .fold_left_while(right.to_vec(), |needed: &Vec<E>| !needed.is_empty(), remove_matches)
                .map(|needed: Vec<E>| needed.is_empty()),
            Source::List(list) => {
                let needed: SharedList<Vec<E>> = Arc::new(FoldListMaterializer::new(
                    self.argument(&list),
                    FoldDirection::Left,
                    Vec::new(),
                    Arc::new(|mut needed: Vec<E>, element: E| {
                        needed.push(element);
                        needed
                    }),
                    None,
                ));
                let proceed: Proceed<Vec<E>> = Arc::new(|needed: &Vec<E>| !needed.is_empty());
                self.combine(Arc::new(FoldListMaterializer::seeded(
                    Arc::clone(&self.materializer),
                    FoldDirection::Left,
                    needed,
                    Arc::new(remove_matches::<E>),
                    Some(proceed),
                )))
                .map(|needed: Vec<E>| needed.is_empty())
            }
        }
    }
}

fn contains_all<E: PartialEq>(left: &[E], right: &[E]) -> bool {
    right.iter().all(|element| left.contains(element))
}

/// Drops from `needed` everything equal to `element`.
fn remove_matches<E: PartialEq>(mut needed: Vec<E>, element: E) -> Vec<E> {
    needed.retain(|candidate| *candidate != element);
    needed
}

// =============================================================================
// Reordering and grouping
// =============================================================================

impl<E: Element> FutureList<E> {
    /// Removes duplicate elements, keeping first occurrences.
    #[must_use]
    pub fn distinct(&self) -> Self
    where
        E: Hash + Eq,
    {
        self.distinct_by(E::clone)
    }

    /// Removes elements whose key was already seen, keeping first
    /// occurrences.
    #[must_use]
    pub fn distinct_by<K, F>(&self, key: F) -> Self
    where
        K: Hash + Eq + Send + Sync + 'static,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        if self.is_at_most_one() {
            return self.clone();
        }
        self.derive(Arc::new(DistinctByListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::new(key),
        )))
    }

    /// The elements in ascending order.
    #[must_use]
    pub fn sorted(&self) -> Self
    where
        E: Ord,
    {
        self.sorted_by(Ord::cmp)
    }

    /// The elements in the order given by `compare`. The sort is stable.
    #[must_use]
    pub fn sorted_by<C>(&self, compare: C) -> Self
    where
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
    {
        if self.is_at_most_one() {
            return self.clone();
        }
        if self.at_once() {
            return self.transform(self.known_size(), move |elements: Elements<E>| {
                let mut sorted = elements.to_vec();
                sorted.sort_by(|left, right| compare(left, right));
                sorted
            });
        }
        self.derive(Arc::new(SortedListMaterializer::new(
            Arc::clone(&self.materializer),
            Arc::new(compare),
        )))
    }

    /// The elements in reverse order.
    #[must_use]
    pub fn reversed(&self) -> Self {
        if self.is_at_most_one() {
            return self.clone();
        }
        if self.at_once() {
            return self.transform(self.known_size(), |elements: Elements<E>| {
                elements.iter().rev().cloned().collect()
            });
        }
        self.derive(Arc::new(ReversedListMaterializer::new(Arc::clone(
            &self.materializer,
        ))))
    }

    /// Windows of `size` elements starting every `step` elements; the
    /// trailing windows may be shorter.
    ///
    /// # Panics
    ///
    /// Panics if `size` or `step` is zero.
    #[must_use]
    pub fn sliding(&self, size: usize, step: usize) -> FutureList<Vec<E>> {
        self.sliding_with(size, step, UnpaddedSplitter)
    }

    /// Windows of `size` elements starting every `step` elements; the
    /// trailing windows are filled up with `padding`.
    ///
    /// # Panics
    ///
    /// Panics if `size` or `step` is zero.
    #[must_use]
    pub fn sliding_padded(&self, size: usize, step: usize, padding: E) -> FutureList<Vec<E>> {
        self.sliding_with(size, step, PaddedSplitter::new(padding))
    }

    /// Windows of `size` elements starting every `step` elements, built by
    /// `splitter`.
    ///
    /// # Panics
    ///
    /// Panics if `size` or `step` is zero.
    #[must_use]
    pub fn sliding_with(
        &self,
        size: usize,
        step: usize,
        splitter: impl Splitter<E> + 'static,
    ) -> FutureList<Vec<E>> {
        assert!(size > 0, "window size must be positive");
        assert!(step > 0, "window step must be positive");
        if self.is_known_empty() {
            return self.resident(Vec::new());
        }
        let splitter: Arc<dyn Splitter<E>> = Arc::new(splitter);
        if self.at_once() {
            let known_size = self.known_size().map(|length| window_count(length, step));
            return self.transform(known_size, move |elements: Elements<E>| {
                windows(&elements, size, step, splitter.as_ref())
            });
        }
        self.derive(Arc::new(SlidingWindowListMaterializer::new(
            Arc::clone(&self.materializer),
            size,
            step,
            splitter,
        )))
    }
}

// =============================================================================
// Set algebra
// =============================================================================

impl<E: Element + PartialEq> FutureList<E> {
    fn set_operation(&self, operation: SetOperation, source: Source<E>) -> Self {
        if source.is_known_empty() {
            return match operation {
                SetOperation::Intersect => self.resident(Vec::new()),
                _ => self.clone(),
            };
        }
        if self.is_known_empty() && operation.is_empty_for_empty_left() {
            return self.clone();
        }
        match source {
            Source::Resident(right) if self.at_once() => {
                self.transform(None, move |left: Elements<E>| operation.apply(&left, &right))
            }
            Source::Resident(right) => self.derive(Arc::new(SetOperationListMaterializer::new(
                Arc::clone(&self.materializer),
                Arc::new(ResidentListMaterializer::from_shared(right)),
                operation,
            ))),
            Source::List(list) => self.combine(Arc::new(SetOperationListMaterializer::new(
                Arc::clone(&self.materializer),
                self.argument(&list),
                operation,
            ))),
        }
    }

    /// The elements not matched by an element of `source`.
    #[must_use]
    pub fn diff(&self, source: impl Into<Source<E>>) -> Self {
        self.set_operation(SetOperation::Diff, source.into())
    }

    /// The elements matched by an element of `source`.
    #[must_use]
    pub fn intersect(&self, source: impl Into<Source<E>>) -> Self {
        self.set_operation(SetOperation::Intersect, source.into())
    }

    /// The elements, then the elements of `source` they do not match.
    #[must_use]
    pub fn union(&self, source: impl Into<Source<E>>) -> Self {
        self.set_operation(SetOperation::Union, source.into())
    }

    /// The unmatched elements of both sides.
    #[must_use]
    pub fn symmetric_diff(&self, source: impl Into<Source<E>>) -> Self {
        self.set_operation(SetOperation::SymmetricDiff, source.into())
    }
}

// =============================================================================
// Blocking access
// =============================================================================

impl<E: Element> FutureList<E> {
    fn elements(&self, timeout: Option<Duration>) -> PipelineResult<Vec<E>> {
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

    fn element_at(
        &self,
        index: usize,
        missing: impl FnOnce(usize) -> PipelineError + Send + 'static,
    ) -> PipelineResult<E> {
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_element(),
            None,
            move |target: BoxConsumer<E>| {
                materializer.materialize_element(
                    index,
                    indexed_consumer(move |result: PipelineResult<Lookup<E>>| match result {
                        Ok(Lookup::Found { element, .. }) => target.accept(element),
                        Ok(Lookup::Complete { size }) => target.error(missing(size)),
                        Err(error) => target.error(error),
                    }),
                );
            },
        )
    }

    /// Blocks until every element is available.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline, or
    /// [`PipelineError::Deadlock`] when called from inside the list's own
    /// execution context before the result is cached.
    pub fn get(&self) -> PipelineResult<Vec<E>> {
        self.elements(None)
    }

    /// Like [`FutureList::get`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Timeout`] when the deadline elapses; the
    /// materialization keeps running in the background.
    pub fn get_timeout(&self, timeout: Duration) -> PipelineResult<Vec<E>> {
        self.elements(Some(timeout))
    }

    /// Blocks until the element at `index` is available.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IndexOutOfBounds`] past the end of the list.
    pub fn get_at(&self, index: usize) -> PipelineResult<E> {
        if let Some(size) = self.known_size()
            && index >= size
        {
            return Err(PipelineError::IndexOutOfBounds { index, size });
        }
        self.element_at(index, move |size| PipelineError::IndexOutOfBounds { index, size })
    }

    /// Blocks until the first element is available.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchElement`] for an empty list.
    pub fn first(&self) -> PipelineResult<E> {
        if self.is_known_empty() {
            return Err(PipelineError::NoSuchElement);
        }
        self.element_at(0, |_| PipelineError::NoSuchElement)
    }

    /// Blocks until the last element is available.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchElement`] for an empty list.
    pub fn last(&self) -> PipelineResult<E> {
        if self.is_known_empty() {
            return Err(PipelineError::NoSuchElement);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_prev_while(),
            None,
            move |target: BoxConsumer<E>| {
                materializer.materialize_prev_while(
                    usize::MAX,
                    Box::new(Last {
                        target: Some(target),
                    }),
                );
            },
        )
    }

    /// Blocks until the size is known.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn size(&self) -> PipelineResult<usize> {
        if let Some(size) = self.known_size() {
            return Ok(size);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_size(),
            None,
            move |target| materializer.materialize_size(target),
        )
    }

    /// Blocks until emptiness is known.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn is_empty(&self) -> PipelineResult<bool> {
        if let Some(size) = self.known_size() {
            return Ok(size == 0);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_empty(),
            None,
            move |target| materializer.materialize_empty(target),
        )
    }

    /// Blocks until `element` is found or the list is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn contains(&self, element: E) -> PipelineResult<bool>
    where
        E: PartialEq,
    {
        if self.is_known_empty() {
            return Ok(false);
        }
        let materializer = Arc::clone(&self.materializer);
        self.binding.wait(
            self.materializer.is_done(),
            self.materializer.weight_next_while(),
            None,
            move |target| materialize_contains(materializer.as_ref(), element, target),
        )
    }

    /// Blocks until every element is available, then runs `action` over
    /// them on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    pub fn do_for(&self, action: impl FnMut(E)) -> PipelineResult<()> {
        self.get()?.into_iter().for_each(action);
        Ok(())
    }
}

/// Takes the first element of a backward scan.
struct Last<E> {
    target: Option<BoxConsumer<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for Last<E> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: E) -> bool {
        if let Some(target) = self.target.take() {
            target.accept(element);
        }
        false
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        if let Some(target) = self.target.take() {
            target.error(PipelineError::NoSuchElement);
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(target) = self.target.take() {
            target.error(error);
        }
    }
}

// =============================================================================
// Non-blocking access
// =============================================================================

impl<E: Element> FutureList<E> {
    /// Schedules the materialization and hands the elements to `target`.
    ///
    /// After a cancellation `target` receives the cancellation error, even
    /// when the computation succeeded.
    pub fn non_blocking_get(&self, target: BoxConsumer<Elements<E>>) {
        let materializer = Arc::clone(&self.materializer);
        self.binding.submit(
            self.materializer.weight_elements(),
            move |target| materializer.materialize_elements(target),
            target,
        );
    }

    /// Schedules a forward scan feeding `predicate` until it returns `false`
    /// or the list is exhausted.
    pub fn non_blocking_for(&self, predicate: BoxPredicate<E>) {
        let materializer = Arc::clone(&self.materializer);
        self.binding
            .spawn(self.materializer.weight_next_while(), move |ready| match ready {
                Ok(()) => materializer.materialize_next_while(0, predicate),
                Err(error) => predicate.error(error),
            });
    }

    /// Resolves to every element, without blocking a thread.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the pipeline.
    #[cfg(feature = "runtime")]
    pub async fn elements_async(&self) -> PipelineResult<Vec<E>> {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        self.non_blocking_get(crate::consumer::consumer(move |result| {
            let _ = sender.send(result);
        }));
        receiver
            .await
            .map_err(|_| {
                PipelineError::Failed(crate::error::Failure::new(
                    "the result was dropped before delivery",
                ))
            })?
            .map(Arc::unwrap_or_clone)
    }
}

// =============================================================================
// Control and conversion
// =============================================================================

impl<E: Element> FutureList<E> {
    /// Requests cancellation of the whole chain.
    ///
    /// Returns `false` when the list is already done or another cancellation
    /// won. With `may_interrupt`, a running task of this list is flagged (see
    /// [`crate::context::runtime::is_interrupted`]).
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

    /// Returns `true` once the list succeeded, failed or was cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.binding.is_cancelled() || self.materializer.is_done()
    }

    /// Returns `true` if the computation failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.binding.is_cancelled() && self.materializer.is_failed()
    }

    /// Returns `true` if the full result is cached.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        !self.binding.is_cancelled() && self.materializer.is_succeeded()
    }

    /// The size, when it can be told without work.
    #[must_use]
    pub fn known_size(&self) -> Option<usize> {
        self.materializer.known_size()
    }

    /// Returns `true` if the full result is resident.
    #[must_use]
    pub fn is_materialized_at_once(&self) -> bool {
        self.materializer.is_materialized_at_once()
    }

    /// The id under which this list schedules its work.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        self.binding.task_id()
    }

    /// The execution context this list runs on.
    #[must_use]
    pub const fn context(&self) -> &SharedContext {
        self.binding.context()
    }

    /// A single pass iterator over the elements.
    #[must_use]
    pub fn iterator(&self) -> FutureIterator<E> {
        FutureIterator::from_parts(
            self.binding.derive("iterator"),
            Arc::new(ListCursorIteratorMaterializer::new(
                Arc::clone(&self.materializer),
                0,
            )),
        )
    }

    /// A bidirectional cursor starting before the first element.
    #[must_use]
    pub fn list_iterator(&self) -> FutureListIterator<E> {
        self.list_iterator_at(0)
    }

    /// A bidirectional cursor starting before the element at `index`.
    #[must_use]
    pub fn list_iterator_at(&self, index: usize) -> FutureListIterator<E> {
        FutureListIterator::new(self.derive(Arc::clone(&self.materializer)), index)
    }
}

impl<E: Element> Clone for FutureList<E> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            materializer: Arc::clone(&self.materializer),
        }
    }
}

impl<E: Element> fmt::Debug for FutureList<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.binding.is_cancelled() {
            Status::Cancelled
        } else {
            self.materializer.status()
        };
        formatter
            .debug_struct("FutureList")
            .field("task_id", self.task_id())
            .field("known_size", &self.known_size())
            .field("status", &status)
            .finish_non_exhaustive()
    }
}
