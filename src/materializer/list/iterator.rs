//! Random access over a single pass iterator.
//!
//! [`IteratorListMaterializer`] buffers every element pulled from its
//! iterator and serves lookups and scans out of the buffer. Requests that
//! cannot be served yet are queued; the iterator is pulled one element at a
//! time for as long as a queued request is waiting, and no further.
//!
//! Pulling is trampolined: when the iterator answers synchronously the next
//! pull happens in a loop on the same frame instead of recursing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, Lookup, deliver, finish_scan, indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult};
use crate::materializer::{
    Element, Elements, ListMaterializer, SharedIterator, Status, test_element,
};

const WAITING: u8 = 0;
const CONTINUE: u8 = 1;
const STOP: u8 = 2;
const DETACHED: u8 = 3;

type Work = Box<dyn FnOnce() + Send>;

enum Request<E> {
    Element(usize, BoxIndexedConsumer<E>),
    All(BoxConsumer<Elements<E>>),
    Scan(usize, BoxPredicate<E>),
}

struct Buffer<E> {
    elements: Vec<E>,
    outcome: Option<PipelineResult<Elements<E>>>,
    pulling: bool,
    pending: VecDeque<Request<E>>,
}

impl<E> Buffer<E> {
    fn size(&self) -> Option<usize> {
        match self.outcome {
            Some(Ok(_)) => Some(self.elements.len()),
            _ => None,
        }
    }

    /// Marks the buffer as pulling. Returns `true` if the caller must pull.
    fn claim_pull(&mut self) -> bool {
        if self.pulling || self.outcome.is_some() || self.pending.is_empty() {
            return false;
        }
        self.pulling = true;
        true
    }

    fn end(&self) -> Option<PipelineResult<usize>> {
        match &self.outcome {
            Some(Ok(_)) => Some(Ok(self.elements.len())),
            Some(Err(error)) => Some(Err(error.clone())),
            None => None,
        }
    }
}

struct Shared<E> {
    iterator: SharedIterator<E>,
    buffer: Mutex<Buffer<E>>,
}

impl<E: Element> Shared<E> {
    /// Turns a request into runnable work if the buffer can answer it.
    fn serve(self: &Arc<Self>, buffer: &Buffer<E>, request: Request<E>) -> Result<Work, Request<E>> {
        match request {
            Request::Element(index, target) => {
                if let Some(element) = buffer.elements.get(index) {
                    let (size, element) = (buffer.size(), element.clone());
                    return Ok(Box::new(move || target.accept(size, index, element)));
                }
                match buffer.end() {
                    Some(Ok(size)) => Ok(Box::new(move || target.complete(size))),
                    Some(Err(error)) => Ok(Box::new(move || target.error(error))),
                    None => Err(Request::Element(index, target)),
                }
            }
            Request::All(target) => match &buffer.outcome {
                Some(result) => {
                    let result = result.clone();
                    Ok(Box::new(move || deliver(target, result)))
                }
                None => Err(Request::All(target)),
            },
            Request::Scan(index, predicate) => {
                if index < buffer.elements.len() || buffer.outcome.is_some() {
                    let shared = Arc::clone(self);
                    Ok(Box::new(move || shared.run_scan(index, predicate)))
                } else {
                    Err(Request::Scan(index, predicate))
                }
            }
        }
    }

    fn submit(self: &Arc<Self>, request: Request<E>) {
        let (work, start) = {
            let mut guard = self.buffer.lock();
            let buffer = &mut *guard;
            match self.serve(buffer, request) {
                Ok(work) => (Some(work), false),
                Err(request) => {
                    buffer.pending.push_back(request);
                    (None, buffer.claim_pull())
                }
            }
        };
        if let Some(work) = work {
            work();
        }
        if start {
            self.pull();
        }
    }

    fn run_scan(self: &Arc<Self>, mut index: usize, mut predicate: BoxPredicate<E>) {
        loop {
            let (batch, size) = {
                let mut guard = self.buffer.lock();
                let buffer = &mut *guard;
                if index >= buffer.elements.len() {
                    if let Some(end) = buffer.end() {
                        drop(guard);
                        return finish_scan(predicate, end);
                    }
                    buffer.pending.push_back(Request::Scan(index, predicate));
                    let start = buffer.claim_pull();
                    drop(guard);
                    if start {
                        self.pull();
                    }
                    return;
                }
                (buffer.elements[index..].to_vec(), buffer.size())
            };
            for element in batch {
                match test_element(&mut predicate, size, index, element) {
                    Ok(true) => index += 1,
                    Ok(false) => return,
                    Err(error) => return predicate.error(error),
                }
            }
        }
    }

    fn pull(self: &Arc<Self>) {
        loop {
            let handoff = Arc::new(AtomicU8::new(WAITING));
            let signal = Arc::clone(&handoff);
            let shared = Arc::clone(self);
            self.iterator.materialize_next(indexed_consumer(move |result| {
                let more = shared.absorb(result);
                let next = if more { CONTINUE } else { STOP };
                let detached = signal
                    .compare_exchange(WAITING, next, Ordering::AcqRel, Ordering::Acquire)
                    .is_err();
                if detached && more {
                    shared.pull();
                }
            }));
            let handed = handoff.compare_exchange(WAITING, DETACHED, Ordering::AcqRel, Ordering::Acquire);
            if handed != Err(CONTINUE) {
                return;
            }
        }
    }

    /// Records a pulled element and serves what it unblocks.
    ///
    /// Returns `true` while queued requests still need more elements.
    fn absorb(self: &Arc<Self>, result: PipelineResult<Lookup<E>>) -> bool {
        let works: Vec<Work> = {
            let mut guard = self.buffer.lock();
            let buffer = &mut *guard;
            match result {
                Ok(Lookup::Found { element, .. }) => buffer.elements.push(element),
                Ok(Lookup::Complete { .. }) => {
                    tracing::trace!(size = buffer.elements.len(), "iterator exhausted");
                    buffer.outcome = Some(Ok(Arc::new(buffer.elements.clone())));
                }
                Err(error) => {
                    if buffer.outcome.is_none() {
                        buffer.outcome = Some(Err(error));
                    }
                }
            }
            self.drain(buffer)
        };
        for work in works {
            work();
        }
        let mut buffer = self.buffer.lock();
        let more = buffer.outcome.is_none() && !buffer.pending.is_empty();
        if !more {
            buffer.pulling = false;
        }
        more
    }

    fn drain(self: &Arc<Self>, buffer: &mut Buffer<E>) -> Vec<Work> {
        let pending = std::mem::take(&mut buffer.pending);
        let mut works = Vec::new();
        for request in pending {
            match self.serve(buffer, request) {
                Ok(work) => works.push(work),
                Err(request) => buffer.pending.push_back(request),
            }
        }
        works
    }
}

/// Exposes a single pass iterator as a random access sequence.
pub struct IteratorListMaterializer<E> {
    shared: Arc<Shared<E>>,
}

impl<E: Element> IteratorListMaterializer<E> {
    /// Wraps `iterator`, which must not be consumed by anyone else.
    pub fn new(iterator: SharedIterator<E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                iterator,
                buffer: Mutex::new(Buffer {
                    elements: Vec::new(),
                    outcome: None,
                    pulling: false,
                    pending: VecDeque::new(),
                }),
            }),
        }
    }
}

impl<E: Element> ListMaterializer<E> for IteratorListMaterializer<E> {
    fn known_size(&self) -> Option<usize> {
        let untouched = {
            let buffer = self.shared.buffer.lock();
            if let Some(size) = buffer.size() {
                return Some(size);
            }
            buffer.elements.is_empty() && !buffer.pulling && buffer.outcome.is_none()
        };
        if untouched {
            self.shared.iterator.known_size()
        } else {
            None
        }
    }

    fn is_materialized_at_once(&self) -> bool {
        matches!(self.shared.buffer.lock().outcome, Some(Ok(_)))
    }

    fn status(&self) -> Status {
        match &self.shared.buffer.lock().outcome {
            None => Status::Pending,
            Some(Ok(_)) => Status::Succeeded,
            Some(Err(PipelineError::Cancelled(_))) => Status::Cancelled,
            Some(Err(_)) => Status::Failed,
        }
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        let works = {
            let mut guard = self.shared.buffer.lock();
            let buffer = &mut *guard;
            if buffer.outcome.is_some() {
                return;
            }
            buffer.outcome = Some(Err(PipelineError::Cancelled(signal.clone())));
            self.shared.drain(buffer)
        };
        tracing::debug!(waiters = works.len(), "iterator list cancelled");
        for work in works {
            work();
        }
        self.shared.iterator.materialize_cancel(signal);
    }

    fn materialize_element(&self, index: usize, consumer: BoxIndexedConsumer<E>) {
        self.shared.submit(Request::Element(index, consumer));
    }

    fn materialize_elements(&self, consumer: BoxConsumer<Elements<E>>) {
        self.shared.submit(Request::All(consumer));
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.shared.submit(Request::Scan(index, predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.shared.submit(Request::All(super::serve_prev_while(index, predicate)));
    }

    fn weight_element(&self) -> usize {
        self.shared.iterator.weight_next()
    }

    fn weight_elements(&self) -> usize {
        self.shared.iterator.weight_elements()
    }

    fn weight_next_while(&self) -> usize {
        self.shared.iterator.weight_next_while()
    }
}

impl<E> fmt::Debug for IteratorListMaterializer<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.shared.buffer.lock();
        formatter
            .debug_struct("IteratorListMaterializer")
            .field("buffered", &buffer.elements.len())
            .field("pulling", &buffer.pulling)
            .field("pending", &buffer.pending.len())
            .field("done", &buffer.outcome.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{consumer, predicate};
    use crate::context::TaskId;
    use crate::materializer::iterator::{MapIteratorMaterializer, ResidentIteratorMaterializer};
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn counted(values: Vec<i32>, pulls: &Arc<AtomicUsize>) -> IteratorListMaterializer<i32> {
        let counter = Arc::clone(pulls);
        let iterator: SharedIterator<i32> = Arc::new(MapIteratorMaterializer::<i32, i32>::new(
            Arc::new(ResidentIteratorMaterializer::new(values)),
            Arc::new(move |value: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                value
            }),
        ));
        IteratorListMaterializer::new(iterator)
    }

    #[rstest]
    fn lookup_pulls_only_up_to_the_index() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let list = counted((1..=100).collect(), &pulls);
        let (sender, receiver) = mpsc::channel();
        list.materialize_element(2, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap().unwrap().into_element(), Some(3));
        assert_eq!(pulls.load(Ordering::SeqCst), 3);

        let (sender, receiver) = mpsc::channel();
        list.materialize_element(1, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap().unwrap().into_element(), Some(2));
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    fn scan_pulls_until_it_stops() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let list = counted((1..=100).collect(), &pulls);
        let (sender, receiver) = mpsc::channel();
        list.materialize_next_while(
            0,
            predicate(
                move |_, _, value: i32| {
                    sender.send(value).unwrap();
                    value < 4
                },
                |_| {},
            ),
        );
        assert_eq!(receiver.try_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(pulls.load(Ordering::SeqCst), 4);
    }

    #[rstest]
    fn long_iterators_do_not_recurse() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let list = counted((0..200_000).collect(), &pulls);
        let (sender, receiver) = mpsc::channel();
        list.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap().unwrap().len(), 200_000);
        assert_eq!(list.known_size(), Some(200_000));
        assert!(list.is_succeeded());
    }

    #[rstest]
    fn past_end_lookup_completes() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let list = counted(vec![1, 2], &pulls);
        let (sender, receiver) = mpsc::channel();
        list.materialize_element(5, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), Ok(Lookup::Complete { size: 2 }));
    }

    #[rstest]
    fn cancel_fails_pending_and_propagates() {
        let iterator: SharedIterator<i32> = Arc::new(ResidentIteratorMaterializer::new(vec![1]));
        let list = IteratorListMaterializer::new(Arc::clone(&iterator));
        list.materialize_cancel(&CancellationSignal::new(TaskId::from("t"), false));
        assert!(list.is_cancelled());
        assert!(iterator.is_cancelled());

        let (sender, receiver) = mpsc::channel();
        list.materialize_element(0, indexed_consumer(move |result| sender.send(result).unwrap()));
        assert!(receiver.recv().unwrap().unwrap_err().is_cancelled());
    }
}
