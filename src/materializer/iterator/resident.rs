use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Position;
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate};
use crate::error::{CancellationSignal, PipelineError};
use crate::materializer::{Element, Elements, IteratorMaterializer, Status};

/// Iterates over data that is already in memory.
pub struct ResidentIteratorMaterializer<E> {
    elements: Elements<E>,
    position: Position,
    cancelled: Mutex<Option<PipelineError>>,
}

impl<E: Element> ResidentIteratorMaterializer<E> {
    /// Iterates over a vector.
    #[must_use]
    pub fn new(elements: Vec<E>) -> Self {
        Self::from_shared(Arc::new(elements))
    }

    /// Iterates over an already shared collection.
    #[must_use]
    pub fn from_shared(elements: Elements<E>) -> Self {
        Self {
            elements,
            position: Position::default(),
            cancelled: Mutex::new(None),
        }
    }

    fn cancellation(&self) -> Option<PipelineError> {
        self.cancelled.lock().clone()
    }
}

impl<E: Element> IteratorMaterializer<E> for ResidentIteratorMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        Some(self.position.remaining(self.elements.len()))
    }

    fn is_materialized_at_once(&self) -> bool {
        true
    }

    fn status(&self) -> Status {
        if self.cancelled.lock().is_some() {
            Status::Cancelled
        } else {
            Status::Succeeded
        }
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        self.cancelled
            .lock()
            .get_or_insert_with(|| PipelineError::Cancelled(signal.clone()));
    }

    fn materialize_has_next(&self, consumer: BoxConsumer<bool>) {
        match self.cancellation() {
            Some(error) => consumer.error(error),
            None => consumer.accept(self.position.remaining(self.elements.len()) > 0),
        }
    }

    fn materialize_next(&self, consumer: BoxIndexedConsumer<E>) {
        match self.cancellation() {
            Some(error) => consumer.error(error),
            None => self.position.next(&self.elements, consumer),
        }
    }

    fn materialize_next_while(&self, predicate: BoxPredicate<E>) {
        match self.cancellation() {
            Some(error) => predicate.error(error),
            None => self.position.next_while(&self.elements, predicate),
        }
    }

    fn materialize_skip(&self, count: usize, consumer: BoxConsumer<usize>) {
        match self.cancellation() {
            Some(error) => consumer.error(error),
            None => consumer.accept(self.position.skip(self.elements.len(), count)),
        }
    }

    fn materialize_elements(&self, consumer: BoxConsumer<Elements<E>>) {
        match self.cancellation() {
            Some(error) => consumer.error(error),
            None => consumer.accept(self.position.rest(&self.elements)),
        }
    }

    fn weight_next(&self) -> usize {
        1
    }

    fn weight_elements(&self) -> usize {
        1
    }
}

impl<E> fmt::Debug for ResidentIteratorMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ResidentIteratorMaterializer")
            .field("size", &self.elements.len())
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
