//! Slicing with bounds relative to the end of the sequence.

use std::fmt;
use std::sync::Arc;

use super::{DropListMaterializer, TakeListMaterializer};
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate, consumer};
use crate::error::{CancellationSignal, PipelineError};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// Resolves possibly negative `[start, end)` bounds against `size`.
///
/// Negative bounds count from the end. Both bounds are clamped to
/// `[0, size]` and an end before the start yields an empty range.
///
/// # Examples
///
/// ```rust
/// use lazy_collections::materializer::list::normalize_bounds;
///
/// assert_eq!(normalize_bounds(1, -1, 5), (1, 4));
/// assert_eq!(normalize_bounds(-2, 10, 5), (3, 5));
/// assert_eq!(normalize_bounds(4, 2, 5), (4, 4));
/// ```
#[must_use]
pub fn normalize_bounds(start: isize, end: isize, size: usize) -> (usize, usize) {
    let resolve = |bound: isize| -> usize {
        if bound < 0 {
            size.saturating_sub(bound.unsigned_abs())
        } else {
            bound.unsigned_abs().min(size)
        }
    };
    let start = resolve(start);
    let end = resolve(end).max(start);
    (start, end)
}

/// Slices an upstream whose size must be learned before the bounds can be
/// resolved.
///
/// The first request materializes the upstream size, then every request is
/// served by a drop-then-take view over the upstream.
pub struct SliceListMaterializer<E> {
    upstream: SharedList<E>,
    start: isize,
    end: isize,
    view: Arc<Memo<SharedList<E>>>,
}

impl<E: Element> SliceListMaterializer<E> {
    /// Creates a new slicing node.
    pub fn new(upstream: SharedList<E>, start: isize, end: isize) -> Self {
        let view = match upstream.known_size() {
            Some(size) => Memo::succeeded(Self::view_of(&upstream, start, end, size)),
            None => Memo::new(),
        };
        Self {
            upstream,
            start,
            end,
            view: Arc::new(view),
        }
    }

    fn view_of(upstream: &SharedList<E>, start: isize, end: isize, size: usize) -> SharedList<E> {
        let (start, end) = normalize_bounds(start, end, size);
        let dropped: SharedList<E> = Arc::new(DropListMaterializer::new(Arc::clone(upstream), start));
        Arc::new(TakeListMaterializer::new(dropped, end - start))
    }

    fn with_view(&self, request: impl FnOnce(Result<SharedList<E>, PipelineError>) + Send + 'static) {
        let upstream = Arc::clone(&self.upstream);
        let view = Arc::clone(&self.view);
        let (start, end) = (self.start, self.end);
        self.view.materialize(consumer(request), move || {
            let resolved = Arc::clone(&upstream);
            upstream.materialize_size(consumer(move |result| {
                view.complete(result.map(|size| Self::view_of(&resolved, start, end, size)));
            }));
        });
    }
}

impl<E: Element> ListMaterializer<E> for SliceListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        self.view.value().and_then(|view| view.known_size())
    }

    fn is_materialized_at_once(&self) -> bool {
        self.view
            .value()
            .is_some_and(|view| view.is_materialized_at_once())
    }

    fn status(&self) -> Status {
        match self.view.value() {
            Some(view) => view.status(),
            None => self.view.status(),
        }
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        match self.view.value() {
            Some(view) => view.materialize_cancel(signal),
            None => {
                if self.view.cancel(signal) {
                    self.upstream.materialize_cancel(signal);
                }
            }
        }
    }

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        self.with_view(move |view| match view {
            Ok(view) => view.materialize_element(index, target),
            Err(error) => target.error(error),
        });
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.with_view(move |view| match view {
            Ok(view) => view.materialize_elements(target),
            Err(error) => target.error(error),
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.with_view(move |view| match view {
            Ok(view) => view.materialize_next_while(index, predicate),
            Err(error) => predicate.error(error),
        });
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.with_view(move |view| match view {
            Ok(view) => view.materialize_prev_while(index, predicate),
            Err(error) => predicate.error(error),
        });
    }

    fn weight_element(&self) -> usize {
        self.view.value().map_or_else(
            || self.upstream.weight_size().saturating_add(self.upstream.weight_element()),
            |view| view.weight_element(),
        )
    }

    fn weight_elements(&self) -> usize {
        self.view.value().map_or_else(
            || self.upstream.weight_elements().saturating_add(1),
            |view| view.weight_elements(),
        )
    }
}

impl<E> fmt::Debug for SliceListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SliceListMaterializer")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}
