//! The materializer contract.
//!
//! A materializer is a pull-based node of a lazy pipeline. It knows its size
//! when that can be told without work ([`ListMaterializer::known_size`]),
//! whether its full result is already resident
//! ([`ListMaterializer::is_materialized_at_once`]), and its lifecycle
//! [`Status`]. Data is obtained through the `materialize_*` entry points, each
//! paired with a `weight_*` cost estimate used as a scheduling hint.
//!
//! Two shapes exist:
//!
//! - [`ListMaterializer`]: random access sequences (element at index, forward
//!   and backward scans).
//! - [`IteratorMaterializer`]: single pass sequences (next, skip, forward scan).
//!
//! Materializers compose into a DAG built strictly bottom-up: every node owns
//! shared handles to the upstream nodes it wraps and nothing points back.
//!
//! Results are never thrown: they are delivered through the consumer protocol
//! of [`crate::consumer`], and panics raised by user functions are converted
//! into [`crate::error::PipelineError::Failed`] at the invocation boundary.

pub mod iterator;
pub mod list;
pub(crate) mod memo;

use std::sync::Arc;

use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, Lookup, consumer, indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineResult, guard};

/// Bound shared by every element flowing through a pipeline.
pub trait Element: Clone + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Send + Sync + 'static {}

/// A fully materialized collection, shared between consumers.
pub type Elements<E> = Arc<Vec<E>>;

/// Shared handle to a list-shaped materializer.
pub type SharedList<E> = Arc<dyn ListMaterializer<E>>;

/// Shared handle to an iterator-shaped materializer.
pub type SharedIterator<E> = Arc<dyn IteratorMaterializer<E>>;

// =============================================================================
// Status
// =============================================================================

/// Lifecycle of a materializer.
///
/// `Pending` covers both the immaterial and the materializing states; the
/// other three are terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Not computed yet, or being computed.
    Pending,
    /// Computed, result cached.
    Succeeded,
    /// Failed, error cached.
    Failed,
    /// Cancelled.
    Cancelled,
}

impl Status {
    /// Returns `true` for the terminal states.
    #[must_use]
    pub const fn is_done(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// =============================================================================
// ListMaterializer
// =============================================================================

/// A lazily computed random access sequence.
///
/// # Scan conventions
///
/// [`ListMaterializer::materialize_next_while`] tests elements from `index`
/// upwards; [`ListMaterializer::materialize_prev_while`] tests elements from
/// `min(index, size - 1)` downwards. A scan ends when the predicate returns
/// `false` (nothing else is called), when the sequence is exhausted
/// (`complete(size)` is called) or on error.
pub trait ListMaterializer<E: Element>: Send + Sync {
    /// The exact size when available without work.
    fn known_size(&self) -> Option<usize>;

    /// Whether the full result can be obtained without scheduling work.
    fn is_materialized_at_once(&self) -> bool;

    /// The lifecycle status.
    fn status(&self) -> Status;

    /// Shorthand for `status().is_done()`.
    fn is_done(&self) -> bool {
        self.status().is_done()
    }

    /// Shorthand for `status() == Status::Cancelled`.
    fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    /// Shorthand for `status() == Status::Failed`.
    fn is_failed(&self) -> bool {
        self.status() == Status::Failed
    }

    /// Shorthand for `status() == Status::Succeeded`.
    fn is_succeeded(&self) -> bool {
        self.status() == Status::Succeeded
    }

    /// Cancels the node and its primary upstream. Idempotent.
    fn materialize_cancel(&self, signal: &CancellationSignal);

    /// Delivers the element at `index`, or `complete(size)` past the end.
    fn materialize_element(&self, index: usize, consumer: BoxIndexedConsumer<E>);

    /// Delivers the full collection.
    fn materialize_elements(&self, consumer: BoxConsumer<Elements<E>>);

    /// Delivers whether an element exists at `index`.
    fn materialize_has_element(&self, index: usize, consumer: BoxConsumer<bool>) {
        match self.known_size() {
            Some(size) if self.status() != Status::Cancelled && self.status() != Status::Failed => {
                consumer.accept(index < size);
            }
            _ => self.materialize_element(
                index,
                indexed_consumer(move |result: PipelineResult<Lookup<E>>| match result {
                    Ok(Lookup::Found { .. }) => consumer.accept(true),
                    Ok(Lookup::Complete { .. }) => consumer.accept(false),
                    Err(error) => consumer.error(error),
                }),
            ),
        }
    }

    /// Delivers the number of elements.
    fn materialize_size(&self, consumer: BoxConsumer<usize>) {
        match self.known_size() {
            Some(size) if !self.is_cancelled() && !self.is_failed() => consumer.accept(size),
            _ => self.materialize_elements(map_consumer(consumer, |elements: Elements<E>| elements.len())),
        }
    }

    /// Delivers whether the sequence is empty.
    fn materialize_empty(&self, consumer: BoxConsumer<bool>) {
        self.materialize_has_element(0, map_consumer(consumer, |has_first: bool| !has_first));
    }

    /// Forward short-circuiting scan starting at `index`.
    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>);

    /// Backward short-circuiting scan starting at `min(index, size - 1)`.
    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>);

    /// Cost of [`ListMaterializer::materialize_element`].
    fn weight_element(&self) -> usize;

    /// Cost of [`ListMaterializer::materialize_elements`].
    fn weight_elements(&self) -> usize;

    /// Cost of [`ListMaterializer::materialize_has_element`].
    fn weight_has_element(&self) -> usize {
        if self.known_size().is_some() {
            1
        } else {
            self.weight_element()
        }
    }

    /// Cost of [`ListMaterializer::materialize_size`].
    fn weight_size(&self) -> usize {
        if self.known_size().is_some() {
            1
        } else {
            self.weight_elements()
        }
    }

    /// Cost of [`ListMaterializer::materialize_empty`].
    fn weight_empty(&self) -> usize {
        self.weight_has_element()
    }

    /// Cost of [`ListMaterializer::materialize_next_while`].
    fn weight_next_while(&self) -> usize {
        self.weight_elements()
    }

    /// Cost of [`ListMaterializer::materialize_prev_while`].
    fn weight_prev_while(&self) -> usize {
        self.weight_elements()
    }

    /// Cost of [`ListMaterializer::materialize_cancel`].
    fn weight_cancel(&self) -> usize {
        1
    }
}

/// Delivers whether the sequence contains `element`, scanning forward.
pub fn materialize_contains<E>(
    materializer: &dyn ListMaterializer<E>,
    element: E,
    consumer: BoxConsumer<bool>,
) where
    E: Element + PartialEq,
{
    let found = Arc::new(parking_lot::Mutex::new(Some(consumer)));
    let on_done = Arc::clone(&found);
    materializer.materialize_next_while(
        0,
        crate::consumer::predicate(
            move |_, _, candidate: E| {
                if candidate == element {
                    let consumer = found.lock().take();
                    if let Some(consumer) = consumer {
                        consumer.accept(true);
                    }
                    return false;
                }
                true
            },
            move |result| {
                let consumer = on_done.lock().take();
                if let Some(consumer) = consumer {
                    match result {
                        Ok(_) => consumer.accept(false),
                        Err(error) => consumer.error(error),
                    }
                }
            },
        ),
    );
}

// =============================================================================
// IteratorMaterializer
// =============================================================================

/// A lazily computed single pass sequence.
///
/// Indexes passed to consumers are the ordinal position of the element since
/// the iterator was created. Every element delivered through
/// [`IteratorMaterializer::materialize_next`] or tested by
/// [`IteratorMaterializer::materialize_next_while`] is consumed.
pub trait IteratorMaterializer<E: Element>: Send + Sync {
    /// The exact number of remaining elements when available without work.
    fn known_size(&self) -> Option<usize>;

    /// Whether the remaining elements can be obtained without scheduling work.
    fn is_materialized_at_once(&self) -> bool;

    /// The lifecycle status of the materialization, independent of how many
    /// elements were consumed so far.
    fn status(&self) -> Status;

    /// Shorthand for `status().is_done()`.
    fn is_done(&self) -> bool {
        self.status().is_done()
    }

    /// Shorthand for `status() == Status::Cancelled`.
    fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    /// Shorthand for `status() == Status::Failed`.
    fn is_failed(&self) -> bool {
        self.status() == Status::Failed
    }

    /// Shorthand for `status() == Status::Succeeded`.
    fn is_succeeded(&self) -> bool {
        self.status() == Status::Succeeded
    }

    /// Cancels the node and its primary upstream. Idempotent.
    fn materialize_cancel(&self, signal: &CancellationSignal);

    /// Delivers whether another element is available, without consuming it.
    fn materialize_has_next(&self, consumer: BoxConsumer<bool>);

    /// Consumes and delivers the next element, or `complete(count)` when exhausted.
    fn materialize_next(&self, consumer: BoxIndexedConsumer<E>);

    /// Forward short-circuiting scan over the remaining elements.
    fn materialize_next_while(&self, predicate: BoxPredicate<E>);

    /// Consumes up to `count` elements and delivers how many were skipped.
    fn materialize_skip(&self, count: usize, consumer: BoxConsumer<usize>) {
        if count == 0 {
            consumer.accept(0);
            return;
        }
        let state = Arc::new(parking_lot::Mutex::new((0, Some(consumer))));
        let on_done = Arc::clone(&state);
        self.materialize_next_while(crate::consumer::predicate(
            move |_, _, _| {
                let mut state = state.lock();
                state.0 += 1;
                if state.0 < count {
                    return true;
                }
                let skipped = state.0;
                let consumer = state.1.take();
                drop(state);
                if let Some(consumer) = consumer {
                    consumer.accept(skipped);
                }
                false
            },
            move |result| {
                let (skipped, consumer) = {
                    let mut state = on_done.lock();
                    (state.0, state.1.take())
                };
                if let Some(consumer) = consumer {
                    match result {
                        Ok(_) => consumer.accept(skipped),
                        Err(error) => consumer.error(error),
                    }
                }
            },
        ));
    }

    /// Consumes and delivers all the remaining elements.
    fn materialize_elements(&self, consumer: BoxConsumer<Elements<E>>);

    /// Cost of [`IteratorMaterializer::materialize_has_next`].
    fn weight_has_next(&self) -> usize {
        self.weight_next()
    }

    /// Cost of [`IteratorMaterializer::materialize_next`].
    fn weight_next(&self) -> usize;

    /// Cost of [`IteratorMaterializer::materialize_next_while`].
    fn weight_next_while(&self) -> usize {
        self.weight_elements()
    }

    /// Cost of [`IteratorMaterializer::materialize_skip`].
    fn weight_skip(&self) -> usize {
        self.weight_next_while()
    }

    /// Cost of [`IteratorMaterializer::materialize_elements`].
    fn weight_elements(&self) -> usize;

    /// Cost of [`IteratorMaterializer::materialize_cancel`].
    fn weight_cancel(&self) -> usize {
        1
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Wraps a consumer so that the delivered value is transformed first.
pub(crate) fn map_consumer<T, U>(
    target: BoxConsumer<U>,
    function: impl FnOnce(T) -> U + Send + 'static,
) -> BoxConsumer<T>
where
    T: 'static,
    U: 'static,
{
    consumer(move |result: PipelineResult<T>| match result {
        Ok(value) => match guard(|| function(value)) {
            Ok(mapped) => target.accept(mapped),
            Err(error) => target.error(error),
        },
        Err(error) => target.error(error),
    })
}

/// Tests an element, converting a panic into an error.
pub(crate) fn test_element<E>(
    predicate: &mut BoxPredicate<E>,
    size: Option<usize>,
    index: usize,
    element: E,
) -> PipelineResult<bool> {
    guard(|| predicate.test(size, index, element))
}

/// Forward scan over resident elements.
pub(crate) fn scan_forward<E: Element>(elements: &[E], index: usize, mut predicate: BoxPredicate<E>) {
    let size = elements.len();
    for (position, element) in elements.iter().enumerate().skip(index) {
        match test_element(&mut predicate, Some(size), position, element.clone()) {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                predicate.error(error);
                return;
            }
        }
    }
    predicate.complete(size);
}

/// Backward scan over resident elements.
pub(crate) fn scan_backward<E: Element>(elements: &[E], index: usize, mut predicate: BoxPredicate<E>) {
    let size = elements.len();
    if size > 0 {
        let start = index.min(size - 1);
        for position in (0..=start).rev() {
            match test_element(&mut predicate, Some(size), position, elements[position].clone()) {
                Ok(true) => {}
                Ok(false) => return,
                Err(error) => {
                    predicate.error(error);
                    return;
                }
            }
        }
    }
    predicate.complete(size);
}

/// Serves an index lookup out of resident elements.
pub(crate) fn lookup<E: Element>(elements: &[E], index: usize, consumer: BoxIndexedConsumer<E>) {
    let size = elements.len();
    match elements.get(index) {
        Some(element) => consumer.accept(Some(size), index, element.clone()),
        None => consumer.complete(size),
    }
}

/// Saturating sum of two known sizes.
pub(crate) fn add_sizes(left: Option<usize>, right: Option<usize>) -> Option<usize> {
    Some(left?.saturating_add(right?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::predicate;
    use rstest::rstest;
    use std::sync::mpsc;

    #[rstest]
    fn status_done_states() {
        assert!(!Status::Pending.is_done());
        assert!(Status::Succeeded.is_done());
        assert!(Status::Failed.is_done());
        assert!(Status::Cancelled.is_done());
    }

    #[rstest]
    #[case(0, vec![1, 2], Ok(4))]
    #[case(2, vec![], Ok(4))]
    #[case(9, vec![], Ok(4))]
    fn forward_scan_visits_from_index(
        #[case] start: usize,
        #[case] expected: Vec<i32>,
        #[case] outcome: PipelineResult<usize>,
    ) {
        let (sender, receiver) = mpsc::channel();
        let (visited_sender, visited) = mpsc::channel();
        scan_forward(
            &[1, 2, 3, 4],
            start,
            predicate(
                move |_, _, element: i32| {
                    if element > 2 {
                        return true;
                    }
                    visited_sender.send(element).unwrap();
                    true
                },
                move |result| sender.send(result).unwrap(),
            ),
        );
        assert_eq!(visited.try_iter().collect::<Vec<_>>(), expected);
        assert_eq!(receiver.recv().unwrap(), outcome);
    }

    #[rstest]
    fn backward_scan_clamps_start_and_stops() {
        let (sender, receiver) = mpsc::channel();
        scan_backward(
            &[1, 2, 3, 4],
            100,
            predicate(
                move |_, index, element: i32| {
                    sender.send((index, element)).unwrap();
                    element > 3
                },
                |_| panic!("stopped scans do not complete"),
            ),
        );
        assert_eq!(receiver.try_iter().collect::<Vec<_>>(), vec![(3, 4), (2, 3)]);
    }

    #[rstest]
    fn panicking_predicate_reports_error() {
        let (sender, receiver) = mpsc::channel();
        scan_forward(
            &[1],
            0,
            predicate(
                |_, _, _: i32| panic!("predicate failure"),
                move |result| sender.send(result).unwrap(),
            ),
        );
        assert!(receiver.recv().unwrap().unwrap_err().is_failed());
    }

    #[rstest]
    fn add_sizes_saturates() {
        assert_eq!(add_sizes(Some(usize::MAX), Some(1)), Some(usize::MAX));
        assert_eq!(add_sizes(Some(1), None), None);
    }
}
