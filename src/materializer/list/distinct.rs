//! Removing elements whose key was already seen.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, consumer, deliver,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

#[cfg(feature = "fxhash")]
pub(crate) type KeySet<K> = rustc_hash::FxHashSet<K>;

#[cfg(not(feature = "fxhash"))]
pub(crate) type KeySet<K> = std::collections::HashSet<K>;

/// Extracts the identity key of an element.
pub type KeyOf<E, K> = Arc<dyn Fn(&E) -> K + Send + Sync>;

/// Keeps the first element of every key, in upstream order.
pub struct DistinctByListMaterializer<E, K> {
    upstream: SharedList<E>,
    key: KeyOf<E, K>,
    memo: Arc<Memo<Elements<E>>>,
}

impl<E, K> DistinctByListMaterializer<E, K>
where
    E: Element,
    K: Hash + Eq + Send + Sync + 'static,
{
    /// Creates a new deduplicating node.
    pub fn new(upstream: SharedList<E>, key: KeyOf<E, K>) -> Self {
        Self {
            upstream,
            key,
            memo: Arc::new(Memo::new()),
        }
    }

    fn scan(&self, start: usize, downstream: Downstream<E>) {
        self.upstream.materialize_next_while(
            0,
            Box::new(Unique {
                key: Arc::clone(&self.key),
                memo: Arc::clone(&self.memo),
                seen: KeySet::default(),
                start,
                downstream: Some(downstream),
            }),
        );
    }
}

impl<E, K> ListMaterializer<E> for DistinctByListMaterializer<E, K>
where
    E: Element,
    K: Hash + Eq + Send + Sync + 'static,
{
    fn known_size(&self) -> Option<usize> {
        match self.upstream.known_size() {
            Some(size @ (0 | 1)) => Some(size),
            _ => self.memo.value().map(|elements| elements.len()),
        }
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

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<E>) {
        match self.memo.outcome() {
            Some(outcome) => deliver(serve_element(index, target), outcome),
            None => self.scan(index, Downstream::Lookup(target)),
        }
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<E>>) {
        self.memo.materialize(target, || {
            let key = Arc::clone(&self.key);
            let memo = Arc::clone(&self.memo);
            self.upstream
                .materialize_elements(consumer(move |result: PipelineResult<Elements<E>>| {
                    memo.complete(result.and_then(|elements| {
                        guard(|| {
                            let mut seen = KeySet::default();
                            Arc::new(
                                elements
                                    .iter()
                                    .filter(|element| seen.insert(key(*element)))
                                    .cloned()
                                    .collect(),
                            )
                        })
                    }));
                }));
        });
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<E>) {
        match self.memo.outcome() {
            Some(outcome) => deliver(serve_next_while(index, predicate), outcome),
            None => self.scan(index, Downstream::Scan(predicate)),
        }
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<E>) {
        self.materialize_elements(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_elements().saturating_add(1)
    }
}

impl<E, K> fmt::Debug for DistinctByListMaterializer<E, K> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DistinctByListMaterializer")
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

enum Downstream<E> {
    Lookup(BoxIndexedConsumer<E>),
    Scan(BoxPredicate<E>),
}

struct Unique<E, K> {
    key: KeyOf<E, K>,
    memo: Arc<Memo<Elements<E>>>,
    seen: KeySet<K>,
    start: usize,
    downstream: Option<Downstream<E>>,
}

impl<E, K> IndexedFuturePredicate<E> for Unique<E, K>
where
    E: Element,
    K: Hash + Eq + Send + Sync + 'static,
{
    fn test(&mut self, _size: Option<usize>, _index: usize, element: E) -> bool {
        let key = &self.key;
        let fresh = match guard(|| key(&element)) {
            Ok(key) => self.seen.insert(key),
            Err(error) => {
                self.memo.complete(Err(error.clone()));
                self.error_downstream(error);
                return false;
            }
        };
        if !fresh {
            return true;
        }
        let position = self.seen.len() - 1;
        if position < self.start {
            return true;
        }
        if let Some(Downstream::Scan(predicate)) = self.downstream.as_mut() {
            return predicate.test(None, position, element);
        }
        if let Some(Downstream::Lookup(target)) = self.downstream.take() {
            target.accept(None, position, element);
        }
        false
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        let size = self.seen.len();
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.complete(size),
            Some(Downstream::Scan(predicate)) => predicate.complete(size),
            None => {}
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        self.error_downstream(error);
    }
}

impl<E, K> Unique<E, K> {
    fn error_downstream(&mut self, error: PipelineError) {
        match self.downstream.take() {
            Some(Downstream::Lookup(target)) => target.error(error),
            Some(Downstream::Scan(predicate)) => predicate.error(error),
            None => {}
        }
    }
}
