use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::collect_remaining;
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::{Element, Elements, IteratorMaterializer, SharedIterator, Status};

/// Serves at most `count` upstream elements.
pub struct TakeIteratorMaterializer<E> {
    upstream: SharedIterator<E>,
    count: usize,
    remaining: Arc<Mutex<usize>>,
}

impl<E: Element> TakeIteratorMaterializer<E> {
    /// Creates a new taking node.
    pub fn new(upstream: SharedIterator<E>, count: usize) -> Self {
        Self {
            upstream,
            count,
            remaining: Arc::new(Mutex::new(count)),
        }
    }

    fn served(&self) -> usize {
        self.count - *self.remaining.lock()
    }

    /// Reserves one element. Returns `false` once the limit is reached.
    fn reserve(&self) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

impl<E: Element> IteratorMaterializer<E> for TakeIteratorMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        let remaining = *self.remaining.lock();
        if remaining == 0 {
            return Some(0);
        }
        self.upstream.known_size().map(|size| size.min(remaining))
    }

    fn is_materialized_at_once(&self) -> bool {
        self.upstream.is_materialized_at_once()
    }

    fn status(&self) -> Status {
        self.upstream.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        self.upstream.materialize_cancel(signal);
    }

    fn materialize_has_next(&self, target: BoxConsumer<bool>) {
        if *self.remaining.lock() == 0 {
            return target.accept(false);
        }
        self.upstream.materialize_has_next(target);
    }

    fn materialize_next(&self, target: BoxIndexedConsumer<E>) {
        if !self.reserve() {
            return target.complete(self.served());
        }
        let remaining = Arc::clone(&self.remaining);
        let count = self.count;
        self.upstream
            .materialize_next(indexed_consumer(move |result: PipelineResult<Lookup<E>>| {
                match result {
                    Ok(Lookup::Found {
                        size,
                        index,
                        element,
                    }) => target.accept(size.map(|size| size.min(count)), index, element),
                    Ok(Lookup::Complete { size }) => {
                        *remaining.lock() = 0;
                        target.complete(size.min(count));
                    }
                    Err(error) => target.error(error),
                }
            }));
    }

    fn materialize_next_while(&self, predicate: BoxPredicate<E>) {
        if *self.remaining.lock() == 0 {
            return predicate.complete(self.served());
        }
        self.upstream.materialize_next_while(Box::new(Limit {
            remaining: Arc::clone(&self.remaining),
            count: self.count,
            downstream: Some(predicate),
        }));
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        collect_remaining(self, target);
    }

    fn weight_next(&self) -> usize {
        self.upstream.weight_next()
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_next_while()
    }
}

/// Stops a scan once the limit is reached.
struct Limit<E> {
    remaining: Arc<Mutex<usize>>,
    count: usize,
    downstream: Option<BoxPredicate<E>>,
}

impl<E: Element> IndexedFuturePredicate<E> for Limit<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let last = {
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                return false;
            }
            *remaining -= 1;
            *remaining == 0
        };
        let Some(downstream) = self.downstream.as_mut() else {
            return false;
        };
        let size = size.map(|size| size.min(self.count));
        if !downstream.test(size, index, element) {
            return false;
        }
        if last {
            if let Some(downstream) = self.downstream.take() {
                downstream.complete(self.count);
            }
            return false;
        }
        true
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        let served = self.count - std::mem::take(&mut *self.remaining.lock());
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(served);
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}

impl<E> fmt::Debug for TakeIteratorMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TakeIteratorMaterializer")
            .field("count", &self.count)
            .field("remaining", &*self.remaining.lock())
            .finish_non_exhaustive()
    }
}
