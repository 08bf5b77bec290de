//! Iterator-shaped materializers.
//!
//! - [`ResidentIteratorMaterializer`]: iteration over resident data
//! - [`ListCursorIteratorMaterializer`]: iteration over a list materializer
//! - [`TransformIteratorMaterializer`]: lazy bulk computation, then iteration
//! - [`MapIteratorMaterializer`], [`StepIteratorMaterializer`],
//!   [`DropIteratorMaterializer`], [`TakeIteratorMaterializer`]: incremental
//!   operation nodes

mod cursor;
mod drop;
mod map;
mod resident;
mod step;
mod take;
mod transform;

pub use cursor::ListCursorIteratorMaterializer;
pub use drop::DropIteratorMaterializer;
pub use map::{IteratorMapper, MapIteratorMaterializer};
pub use resident::ResidentIteratorMaterializer;
pub use step::{Step, StepIteratorMaterializer};
pub use take::TakeIteratorMaterializer;
pub use transform::TransformIteratorMaterializer;

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Element, Elements, IteratorMaterializer, test_element};
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate, predicate};

/// Consumes the remaining elements of `iterator` through a forward scan.
pub(crate) fn collect_remaining<E: Element>(
    iterator: &dyn IteratorMaterializer<E>,
    target: BoxConsumer<Elements<E>>,
) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    iterator.materialize_next_while(predicate(
        move |_, _, element: E| {
            sink.lock().push(element);
            true
        },
        move |result| match result {
            Ok(_) => target.accept(Arc::new(std::mem::take(&mut *collected.lock()))),
            Err(error) => target.error(error),
        },
    ));
}

/// Consumption position over resident elements.
#[derive(Debug, Default)]
pub(crate) struct Position {
    next: Mutex<usize>,
}

impl Position {
    /// Claims the next index if it is below `size`.
    fn claim(&self, size: usize) -> Option<usize> {
        let mut next = self.next.lock();
        if *next >= size {
            return None;
        }
        let index = *next;
        *next += 1;
        Some(index)
    }

    pub(crate) fn remaining(&self, size: usize) -> usize {
        size.saturating_sub(*self.next.lock())
    }

    pub(crate) fn skip(&self, size: usize, count: usize) -> usize {
        let mut next = self.next.lock();
        let skipped = count.min(size.saturating_sub(*next));
        *next += skipped;
        skipped
    }

    pub(crate) fn next<E: Element>(&self, elements: &[E], consumer: BoxIndexedConsumer<E>) {
        let size = elements.len();
        match self.claim(size) {
            Some(index) => consumer.accept(Some(size), index, elements[index].clone()),
            None => consumer.complete(size),
        }
    }

    pub(crate) fn next_while<E: Element>(&self, elements: &[E], mut predicate: BoxPredicate<E>) {
        let size = elements.len();
        while let Some(index) = self.claim(size) {
            match test_element(&mut predicate, Some(size), index, elements[index].clone()) {
                Ok(true) => {}
                Ok(false) => return,
                Err(error) => return predicate.error(error),
            }
        }
        predicate.complete(size);
    }

    /// Consumes every remaining element.
    pub(crate) fn rest<E: Element>(&self, elements: &Elements<E>) -> Elements<E> {
        let mut next = self.next.lock();
        let start = (*next).min(elements.len());
        *next = elements.len();
        if start == 0 {
            Arc::clone(elements)
        } else {
            Arc::new(elements[start..].to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::mpsc;

    #[rstest]
    fn position_claims_each_index_once() {
        let position = Position::default();
        assert_eq!(position.claim(2), Some(0));
        assert_eq!(position.claim(2), Some(1));
        assert_eq!(position.claim(2), None);
        assert_eq!(position.remaining(2), 0);
    }

    #[rstest]
    fn scan_consumes_the_stopping_element() {
        let position = Position::default();
        let elements = [1, 2, 3, 4];
        position.next_while(&elements, predicate(|_, _, value: i32| value < 2, |_| {}));
        assert_eq!(position.remaining(4), 2);
    }

    #[rstest]
    fn rest_takes_the_tail() {
        let position = Position::default();
        let elements = Arc::new(vec![1, 2, 3]);
        assert_eq!(position.skip(3, 1), 1);
        assert_eq!(*position.rest(&elements), vec![2, 3]);
        assert_eq!(position.remaining(3), 0);

        let (sender, receiver) = mpsc::channel();
        position.next(
            &elements,
            crate::consumer::indexed_consumer(move |result| sender.send(result).unwrap()),
        );
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(crate::consumer::Lookup::Complete { size: 3 })
        );
    }
}
