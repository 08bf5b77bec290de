use std::fmt;
use std::sync::Arc;

use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, consumer,
    indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, IteratorMaterializer, SharedIterator, Status};

/// Skips the first `count` elements before serving anything.
///
/// The skip runs once, on the first request, and indexes are renumbered
/// from zero afterwards.
pub struct DropIteratorMaterializer<E> {
    upstream: SharedIterator<E>,
    count: usize,
    skipped: Arc<Memo<usize>>,
}

impl<E: Element> DropIteratorMaterializer<E> {
    /// Creates a new dropping node.
    pub fn new(upstream: SharedIterator<E>, count: usize) -> Self {
        Self {
            upstream,
            count,
            skipped: Arc::new(Memo::new()),
        }
    }

    /// Runs `then` once the leading elements are gone.
    fn after_skip(&self, then: impl FnOnce(PipelineResult<usize>) + Send + 'static) {
        self.skipped.materialize(consumer(then), || {
            self.upstream
                .materialize_skip(self.count, self.skipped.completer());
        });
    }
}

impl<E: Element> IteratorMaterializer<E> for DropIteratorMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        let size = self.upstream.known_size()?;
        match self.skipped.status() {
            Status::Succeeded => Some(size),
            _ => Some(size.saturating_sub(self.count)),
        }
    }

    fn is_materialized_at_once(&self) -> bool {
        self.upstream.is_materialized_at_once()
    }

    fn status(&self) -> Status {
        match self.skipped.status() {
            status @ (Status::Failed | Status::Cancelled) => status,
            _ => self.upstream.status(),
        }
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        self.skipped.cancel(signal);
        self.upstream.materialize_cancel(signal);
    }

    fn materialize_has_next(&self, target: BoxConsumer<bool>) {
        let upstream = Arc::clone(&self.upstream);
        self.after_skip(move |result| match result {
            Ok(_) => upstream.materialize_has_next(target),
            Err(error) => target.error(error),
        });
    }

    fn materialize_next(&self, target: BoxIndexedConsumer<E>) {
        let upstream = Arc::clone(&self.upstream);
        self.after_skip(move |result| match result {
            Ok(skipped) => upstream.materialize_next(indexed_consumer(
                move |result: PipelineResult<Lookup<E>>| match result {
                    Ok(Lookup::Found {
                        size,
                        index,
                        element,
                    }) => target.accept(
                        size.map(|size| size.saturating_sub(skipped)),
                        index.saturating_sub(skipped),
                        element,
                    ),
                    Ok(Lookup::Complete { size }) => target.complete(size.saturating_sub(skipped)),
                    Err(error) => target.error(error),
                },
            )),
            Err(error) => target.error(error),
        });
    }

    fn materialize_next_while(&self, predicate: BoxPredicate<E>) {
        let upstream = Arc::clone(&self.upstream);
        self.after_skip(move |result| match result {
            Ok(skipped) => upstream.materialize_next_while(Box::new(Renumber {
                skipped,
                downstream: predicate,
            })),
            Err(error) => predicate.error(error),
        });
    }

    fn materialize_skip(&self, count: usize, target: BoxConsumer<usize>) {
        let upstream = Arc::clone(&self.upstream);
        self.after_skip(move |result| match result {
            Ok(_) => upstream.materialize_skip(count, target),
            Err(error) => target.error(error),
        });
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        let upstream = Arc::clone(&self.upstream);
        self.after_skip(move |result| match result {
            Ok(_) => upstream.materialize_elements(target),
            Err(error) => target.error(error),
        });
    }

    fn weight_next(&self) -> usize {
        self.upstream.weight_next().saturating_add(self.weight_pending_skip())
    }

    fn weight_elements(&self) -> usize {
        self.upstream
            .weight_elements()
            .saturating_add(self.weight_pending_skip())
    }
}

impl<E: Element> DropIteratorMaterializer<E> {
    fn weight_pending_skip(&self) -> usize {
        if self.skipped.status().is_done() {
            0
        } else {
            self.upstream.weight_skip()
        }
    }
}

/// Shifts indexes and sizes down by the number of skipped elements.
struct Renumber<E> {
    skipped: usize,
    downstream: BoxPredicate<E>,
}

impl<E: Element> IndexedFuturePredicate<E> for Renumber<E> {
    fn test(&mut self, size: Option<usize>, index: usize, element: E) -> bool {
        let skipped = self.skipped;
        self.downstream.test(
            size.map(|size| size.saturating_sub(skipped)),
            index.saturating_sub(skipped),
            element,
        )
    }

    fn complete(self: Box<Self>, size: usize) {
        self.downstream.complete(size.saturating_sub(self.skipped));
    }

    fn error(self: Box<Self>, error: PipelineError) {
        self.downstream.error(error);
    }
}

impl<E> fmt::Debug for DropIteratorMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DropIteratorMaterializer")
            .field("count", &self.count)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::predicate;
    use crate::materializer::iterator::ResidentIteratorMaterializer;
    use rstest::rstest;
    use std::sync::mpsc;

    fn dropped(values: Vec<i32>, count: usize) -> DropIteratorMaterializer<i32> {
        DropIteratorMaterializer::new(Arc::new(ResidentIteratorMaterializer::new(values)), count)
    }

    #[rstest]
    fn next_is_renumbered_after_the_skip() {
        let iterator = dropped(vec![1, 2, 3], 2);
        assert_eq!(iterator.known_size(), Some(1));
        let (sender, receiver) = mpsc::channel();
        iterator.materialize_next(indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(
            receiver.recv().unwrap(),
            Ok(Lookup::Found {
                size: Some(1),
                index: 0,
                element: 3
            })
        );
        assert_eq!(iterator.known_size(), Some(0));
    }

    #[rstest]
    fn skip_happens_once() {
        let iterator = dropped(vec![1, 2, 3, 4, 5], 1);
        let (sender, receiver) = mpsc::channel();
        let elements = sender.clone();
        iterator.materialize_next_while(predicate(
            move |_, index, value: i32| {
                sender.send(Ok((index, value))).unwrap();
                value < 3
            },
            |_| {},
        ));
        iterator.materialize_elements(consumer(move |result: PipelineResult<Elements<i32>>| {
            elements
                .send(result.map(|elements| (usize::MAX, elements.iter().sum())))
                .unwrap();
        }));
        assert_eq!(
            receiver.try_iter().collect::<Vec<PipelineResult<(usize, i32)>>>(),
            vec![Ok((0, 2)), Ok((1, 3)), Ok((usize::MAX, 9))]
        );
    }

    #[rstest]
    fn dropping_more_than_available_is_empty() {
        let iterator = dropped(vec![1, 2], 5);
        let (sender, receiver) = mpsc::channel();
        iterator.materialize_has_next(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), Ok(false));
    }
}
