use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, consumer,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::{Element, Elements, IteratorMaterializer, SharedList, Status};

#[derive(Debug, Default)]
struct CursorState {
    position: usize,
    cancelled: Option<PipelineError>,
}

/// Iterates over a list materializer, one index at a time.
///
/// The list is never materialized as a whole unless the remaining elements
/// are requested.
pub struct ListCursorIteratorMaterializer<E> {
    list: SharedList<E>,
    state: Arc<Mutex<CursorState>>,
}

impl<E: Element> ListCursorIteratorMaterializer<E> {
    /// Starts iterating `list` at `position`.
    pub fn new(list: SharedList<E>, position: usize) -> Self {
        Self {
            list,
            state: Arc::new(Mutex::new(CursorState {
                position,
                cancelled: None,
            })),
        }
    }

    /// The index of the next element.
    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    /// Returns the position, or the cancellation error.
    fn current(&self) -> PipelineResult<usize> {
        let state = self.state.lock();
        match &state.cancelled {
            Some(error) => Err(error.clone()),
            None => Ok(state.position),
        }
    }
}

impl<E: Element> IteratorMaterializer<E> for ListCursorIteratorMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        let position = self.position();
        self.list
            .known_size()
            .map(|size| size.saturating_sub(position))
    }

    fn is_materialized_at_once(&self) -> bool {
        self.list.is_materialized_at_once()
    }

    fn status(&self) -> Status {
        if self.state.lock().cancelled.is_some() {
            return Status::Cancelled;
        }
        self.list.status()
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        self.state
            .lock()
            .cancelled
            .get_or_insert_with(|| PipelineError::Cancelled(signal.clone()));
        self.list.materialize_cancel(signal);
    }

    fn materialize_has_next(&self, target: BoxConsumer<bool>) {
        match self.current() {
            Ok(position) => self.list.materialize_has_element(position, target),
            Err(error) => target.error(error),
        }
    }

    fn materialize_next(&self, target: BoxIndexedConsumer<E>) {
        let claimed = {
            let mut state = self.state.lock();
            match state.cancelled.clone() {
                Some(error) => Err(error),
                None => {
                    state.position += 1;
                    Ok(state.position - 1)
                }
            }
        };
        let index = match claimed {
            Ok(index) => index,
            Err(error) => return target.error(error),
        };
        let state = Arc::clone(&self.state);
        self.list
            .materialize_element(index, indexed_consumer(move |result: PipelineResult<Lookup<E>>| {
                match result {
                    Ok(Lookup::Found {
                        size,
                        index,
                        element,
                    }) => target.accept(size, index, element),
                    Ok(Lookup::Complete { size }) => {
                        let mut cursor = state.lock();
                        cursor.position = cursor.position.min(size);
                        drop(cursor);
                        target.complete(size);
                    }
                    Err(error) => target.error(error),
                }
            }));
    }

    fn materialize_next_while(&self, predicate: BoxPredicate<E>) {
        match self.current() {
            Ok(position) => self.list.materialize_next_while(
                position,
                Box::new(Advance {
                    state: Arc::clone(&self.state),
                    downstream: predicate,
                }),
            ),
            Err(error) => predicate.error(error),
        }
    }

    fn materialize_skip(&self, count: usize, target: BoxConsumer<usize>) {
        let start = match self.current() {
            Ok(start) => start,
            Err(error) => return target.error(error),
        };
        if count == 0 {
            return target.accept(0);
        }
        let state = Arc::clone(&self.state);
        let last = start.saturating_add(count - 1);
        self.list.materialize_element(
            last,
            indexed_consumer(move |result: PipelineResult<Lookup<E>>| {
                let end = match result {
                    Ok(Lookup::Found { index, .. }) => index + 1,
                    Ok(Lookup::Complete { size }) => size,
                    Err(error) => return target.error(error),
                };
                let skipped = {
                    let mut cursor = state.lock();
                    let from = cursor.position;
                    cursor.position = from.max(end);
                    cursor.position - from
                };
                target.accept(skipped);
            }),
        );
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        let start = match self.current() {
            Ok(start) => start,
            Err(error) => return target.error(error),
        };
        let state = Arc::clone(&self.state);
        self.list
            .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                match result {
                    Ok(elements) => {
                        let from = start.min(elements.len());
                        {
                            let mut cursor = state.lock();
                            cursor.position = cursor.position.max(elements.len());
                        }
                        let rest = if from == 0 {
                            elements
                        } else {
                            Arc::new(elements[from..].to_vec())
                        };
                        target.accept(rest);
                    }
                    Err(error) => target.error(error),
                }
            }));
    }

    fn weight_has_next(&self) -> usize {
        self.list.weight_has_element()
    }

    fn weight_next(&self) -> usize {
        self.list.weight_element()
    }

    fn weight_next_while(&self) -> usize {
        self.list.weight_next_while()
    }

    fn weight_skip(&self) -> usize {
        self.list.weight_element()
    }

    fn weight_elements(&self) -> usize {
        self.list.weight_elements()
    }
}

/// Moves the cursor past every element the downstream consumed.
struct Advance<E> {
    state: Arc<Mutex<CursorState>>,
    downstream: BoxPredicate<E>,
}

impl<E: Element> IndexedFuturePredicate<E> for Advance<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        {
            let mut cursor = self.state.lock();
            cursor.position = cursor.position.max(index + 1);
        }
        self.downstream.test(size, index, element)
    }

    fn complete(self: Box<Self>, size: usize) {
        {
            let mut cursor = self.state.lock();
            cursor.position = cursor.position.max(size);
        }
        self.downstream.complete(size);
    }

    fn error(self: Box<Self>, error: PipelineError) {
        self.downstream.error(error);
    }
}

impl<E> fmt::Debug for ListCursorIteratorMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ListCursorIteratorMaterializer")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::predicate;
    use crate::context::TaskId;
    use crate::materializer::list::ResidentListMaterializer;
    use rstest::rstest;
    use std::sync::mpsc;

    fn cursor(values: Vec<i32>, position: usize) -> ListCursorIteratorMaterializer<i32> {
        ListCursorIteratorMaterializer::new(Arc::new(ResidentListMaterializer::new(values)), position)
    }

    #[rstest]
    fn next_walks_the_list() {
        let iterator = cursor(vec![1, 2, 3], 1);
        assert_eq!(iterator.known_size(), Some(2));
        let (sender, receiver) = mpsc::channel();
        for _ in 0..3 {
            let sender = sender.clone();
            iterator.materialize_next(indexed_consumer(move |result| sender.send(result).unwrap()));
        }
        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![
                Ok(Lookup::Found {
                    size: Some(3),
                    index: 1,
                    element: 2
                }),
                Ok(Lookup::Found {
                    size: Some(3),
                    index: 2,
                    element: 3
                }),
                Ok(Lookup::Complete { size: 3 }),
            ]
        );
        assert_eq!(iterator.position(), 3);
    }

    #[rstest]
    fn scan_advances_past_the_stopping_element() {
        let iterator = cursor(vec![1, 2, 3, 4], 0);
        iterator.materialize_next_while(predicate(|_, _, value: i32| value < 2, |_| {}));
        assert_eq!(iterator.position(), 2);

        let (sender, receiver) = mpsc::channel();
        iterator.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(*receiver.recv().unwrap().unwrap(), vec![3, 4]);
    }

    #[rstest]
    #[case(0, 2, 2, 2)]
    #[case(1, 10, 2, 3)]
    #[case(3, 1, 0, 3)]
    fn skip_reports_the_skipped_count(
        #[case] start: usize,
        #[case] count: usize,
        #[case] skipped: usize,
        #[case] position: usize,
    ) {
        let iterator = cursor(vec![1, 2, 3], start);
        let (sender, receiver) = mpsc::channel();
        iterator.materialize_skip(count, consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), Ok(skipped));
        assert_eq!(iterator.position(), position);
    }

    #[rstest]
    fn cancel_reaches_the_list() {
        let list: SharedList<i32> = Arc::new(ResidentListMaterializer::new(vec![1]));
        let iterator = ListCursorIteratorMaterializer::new(Arc::clone(&list), 0);
        iterator.materialize_cancel(&CancellationSignal::new(TaskId::from("t"), false));
        assert!(iterator.is_cancelled());
        let (sender, receiver) = mpsc::channel();
        iterator.materialize_has_next(consumer(move |result| sender.send(result).unwrap()));
        assert!(receiver.recv().unwrap().unwrap_err().is_cancelled());
    }
}
