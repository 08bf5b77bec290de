use std::fmt;
use std::sync::Arc;

use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate};
use crate::error::CancellationSignal;
use crate::materializer::{
    Element, Elements, ListMaterializer, Status, lookup, scan_backward, scan_forward,
};

/// A materializer backed by data that is already in memory.
///
/// It is born succeeded, reports its exact size and serves every request
/// synchronously on the calling thread.
pub struct ResidentListMaterializer<E> {
    elements: Elements<E>,
}

impl<E: Element> ResidentListMaterializer<E> {
    /// Wraps a vector.
    #[must_use]
    pub fn new(elements: Vec<E>) -> Self {
        Self::from_shared(Arc::new(elements))
    }

    /// Wraps an already shared collection.
    #[must_use]
    pub const fn from_shared(elements: Elements<E>) -> Self {
        Self { elements }
    }

    /// Creates an empty materializer.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl<E: Element> ListMaterializer<E> for ResidentListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        Some(self.elements.len())
    }

    fn is_materialized_at_once(&self) -> bool {
        true
    }

    fn status(&self) -> Status {
        Status::Succeeded
    }

    fn materialize_cancel(&self, _signal: &CancellationSignal) {}

    fn materialize_element(&self, index: usize, consumer: BoxIndexedConsumer<E>) {
        lookup(&self.elements, index, consumer);
    }

    fn materialize_elements(&self, consumer: BoxConsumer<Elements<E>>) {
        consumer.accept(Arc::clone(&self.elements));
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        scan_forward(&self.elements, index, predicate);
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        scan_backward(&self.elements, index, predicate);
    }

    fn weight_element(&self) -> usize {
        1
    }

    fn weight_elements(&self) -> usize {
        1
    }
}

impl<E> fmt::Debug for ResidentListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ResidentListMaterializer")
            .field("size", &self.elements.len())
            .finish()
    }
}
