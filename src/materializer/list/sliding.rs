//! Sliding windows over a sequence.
//!
//! Windows start at every multiple of `step` while the start is within the
//! sequence, so a sequence of `n` elements yields `ceil(n / step)` windows.
//! Trailing windows may be shorter than `size`; how they are completed is up
//! to the [`Splitter`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, consumer, deliver, predicate,
};
use crate::error::{CancellationSignal, PipelineResult, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// Turns the elements collected for a window into the window itself.
pub trait Splitter<E>: Send + Sync {
    /// Builds a window out of `chunk`, which holds at most `size` elements.
    fn split(&self, chunk: Vec<E>, size: usize) -> Vec<E>;
}

/// Keeps short trailing windows as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnpaddedSplitter;

impl<E> Splitter<E> for UnpaddedSplitter {
    fn split(&self, chunk: Vec<E>, _size: usize) -> Vec<E> {
        chunk
    }
}

/// Fills short trailing windows with copies of a padding element.
#[derive(Debug, Clone)]
pub struct PaddedSplitter<E> {
    padding: E,
}

impl<E> PaddedSplitter<E> {
    /// Creates a splitter padding with `padding`.
    pub const fn new(padding: E) -> Self {
        Self { padding }
    }
}

impl<E: Element> Splitter<E> for PaddedSplitter<E> {
    fn split(&self, mut chunk: Vec<E>, size: usize) -> Vec<E> {
        chunk.resize(size.max(chunk.len()), self.padding.clone());
        chunk
    }
}

/// Number of windows over `length` elements.
pub(crate) fn window_count(length: usize, step: usize) -> usize {
    length.div_ceil(step)
}

/// Cuts resident elements into windows.
pub(crate) fn windows<E: Element>(
    elements: &[E],
    size: usize,
    step: usize,
    splitter: &dyn Splitter<E>,
) -> Vec<Vec<E>> {
    (0..elements.len())
        .step_by(step)
        .map(|start| {
            let end = start.saturating_add(size).min(elements.len());
            splitter.split(elements[start..end].to_vec(), size)
        })
        .collect()
}

struct Window<E> {
    chunk: Vec<E>,
    target: Option<BoxIndexedConsumer<Vec<E>>>,
}

/// A list of windows of `size` elements, one starting every `step` elements.
///
/// A single window lookup only computes the upstream elements it covers.
pub struct SlidingWindowListMaterializer<E> {
    upstream: SharedList<E>,
    size: usize,
    step: usize,
    splitter: Arc<dyn Splitter<E>>,
    memo: Arc<Memo<Elements<Vec<E>>>>,
}

impl<E: Element> SlidingWindowListMaterializer<E> {
    /// Creates a new windowing node. `size` and `step` must be positive.
    pub fn new(
        upstream: SharedList<E>,
        size: usize,
        step: usize,
        splitter: Arc<dyn Splitter<E>>,
    ) -> Self {
        debug_assert!(size > 0 && step > 0, "window size and step must be positive");
        Self {
            upstream,
            size,
            step,
            splitter,
            memo: Arc::new(Memo::new()),
        }
    }

    fn window(&self, index: usize, target: BoxIndexedConsumer<Vec<E>>) {
        let step = self.step;
        let Some(start) = index.checked_mul(step) else {
            return self.materialize(serve_element(index, target));
        };
        let size = self.size;
        let known = self.known_size();
        let state = Arc::new(Mutex::new(Window {
            chunk: Vec::new(),
            target: Some(target),
        }));
        let on_done = Arc::clone(&state);
        let splitter = Arc::clone(&self.splitter);
        let deliver_window = move |chunk: Vec<E>, target: BoxIndexedConsumer<Vec<E>>| {
            match guard(|| splitter.split(chunk, size)) {
                Ok(window) => target.accept(known, index, window),
                Err(error) => target.error(error),
            }
        };
        let deliver_partial = deliver_window.clone();
        self.upstream.materialize_next_while(
            start,
            predicate(
                move |_, _, element: E| {
                    let mut window = state.lock();
                    window.chunk.push(element);
                    if window.chunk.len() < size {
                        return true;
                    }
                    let chunk = std::mem::take(&mut window.chunk);
                    let target = window.target.take();
                    drop(window);
                    if let Some(target) = target {
                        deliver_window(chunk, target);
                    }
                    false
                },
                move |result: PipelineResult<usize>| {
                    let (chunk, target) = {
                        let mut window = on_done.lock();
                        (std::mem::take(&mut window.chunk), window.target.take())
                    };
                    let Some(target) = target else {
                        return;
                    };
                    match result {
                        Ok(_) if !chunk.is_empty() => deliver_partial(chunk, target),
                        Ok(length) => target.complete(window_count(length, step)),
                        Err(error) => target.error(error),
                    }
                },
            ),
        );
    }

    fn materialize(&self, target: BoxConsumer<Elements<Vec<E>>>) {
        self.memo.materialize(target, || {
            let (size, step) = (self.size, self.step);
            let splitter = Arc::clone(&self.splitter);
            let memo = Arc::clone(&self.memo);
            self.upstream
                .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                    memo.complete(result.and_then(|elements| {
                        guard(|| Arc::new(windows(&elements, size, step, splitter.as_ref())))
                    }));
                }));
        });
    }
}

impl<E: Element> ListMaterializer<Vec<E>> for SlidingWindowListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        self.upstream
            .known_size()
            .map(|length| window_count(length, self.step))
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

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<Vec<E>>) {
        match self.memo.outcome() {
            Some(outcome) => deliver(serve_element(index, target), outcome),
            None => self.window(index, target),
        }
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<Vec<E>>>) {
        self.materialize(target);
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<Vec<E>>) {
        self.materialize(serve_next_while(index, predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<Vec<E>>) {
        self.materialize(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }
}

impl<E> fmt::Debug for SlidingWindowListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SlidingWindowListMaterializer")
            .field("size", &self.size)
            .field("step", &self.step)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}
