//! Folding a sequence into a single accumulated value.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{serve_element, serve_next_while, serve_prev_while};
use crate::consumer::{
    BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate, Lookup, indexed_consumer,
};
use crate::error::{CancellationSignal, PipelineError, PipelineResult, guard};
use crate::materializer::memo::Memo;
use crate::materializer::{Element, Elements, ListMaterializer, SharedList, Status};

/// Combines the accumulator with the next element.
pub type Combiner<E, A> = Arc<dyn Fn(A, E) -> A + Send + Sync>;

/// Decides whether accumulation goes on.
pub type Proceed<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// The end of the sequence accumulation starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldDirection {
    /// From the first element towards the last.
    Left,
    /// From the last element towards the first.
    Right,
}

/// A single element list holding the fold of the upstream.
///
/// With a `proceed` condition, accumulation stops as soon as the
/// accumulator no longer satisfies it, and the remaining upstream elements
/// are never requested.
pub struct FoldListMaterializer<E, A> {
    upstream: SharedList<E>,
    seed: Seed<A>,
    combine: Combiner<E, A>,
    proceed: Option<Proceed<A>>,
    direction: FoldDirection,
    memo: Arc<Memo<Elements<A>>>,
}

/// Where the initial accumulator comes from.
enum Seed<A> {
    Identity(Mutex<Option<A>>),
    /// The first element of another list.
    List(SharedList<A>),
}

impl<E: Element, A: Element> FoldListMaterializer<E, A> {
    /// Creates a new folding node.
    pub fn new(
        upstream: SharedList<E>,
        direction: FoldDirection,
        identity: A,
        combine: Combiner<E, A>,
        proceed: Option<Proceed<A>>,
    ) -> Self {
        Self::with_seed(upstream, direction, Seed::Identity(Mutex::new(Some(identity))), combine, proceed)
    }

    /// Creates a folding node whose initial accumulator is the first element
    /// of `seed`, requested only when the fold starts.
    ///
    /// An empty `seed` fails the fold with [`PipelineError::NoSuchElement`].
    pub fn seeded(
        upstream: SharedList<E>,
        direction: FoldDirection,
        seed: SharedList<A>,
        combine: Combiner<E, A>,
        proceed: Option<Proceed<A>>,
    ) -> Self {
        Self::with_seed(upstream, direction, Seed::List(seed), combine, proceed)
    }

    fn with_seed(
        upstream: SharedList<E>,
        direction: FoldDirection,
        seed: Seed<A>,
        combine: Combiner<E, A>,
        proceed: Option<Proceed<A>>,
    ) -> Self {
        Self {
            upstream,
            seed,
            combine,
            proceed,
            direction,
            memo: Arc::new(Memo::new()),
        }
    }

    fn runner(&self) -> Runner<E, A> {
        Runner {
            upstream: Arc::clone(&self.upstream),
            combine: Arc::clone(&self.combine),
            proceed: self.proceed.clone(),
            direction: self.direction,
            memo: Arc::clone(&self.memo),
        }
    }

    fn materialize(&self, target: BoxConsumer<Elements<A>>) {
        self.memo.materialize(target, || match &self.seed {
            Seed::Identity(identity) => {
                if let Some(identity) = identity.lock().take() {
                    self.runner().start(identity);
                }
            }
            Seed::List(seed) => {
                let runner = self.runner();
                seed.materialize_element(
                    0,
                    indexed_consumer(move |result: PipelineResult<Lookup<A>>| match result {
                        Ok(Lookup::Found { element, .. }) => runner.start(element),
                        Ok(Lookup::Complete { .. }) => {
                            runner.memo.complete(Err(PipelineError::NoSuchElement));
                        }
                        Err(error) => runner.memo.complete(Err(error)),
                    }),
                );
            }
        });
    }
}

/// Everything needed to run the fold once the initial accumulator is known.
struct Runner<E, A> {
    upstream: SharedList<E>,
    combine: Combiner<E, A>,
    proceed: Option<Proceed<A>>,
    direction: FoldDirection,
    memo: Arc<Memo<Elements<A>>>,
}

impl<E: Element, A: Element> Runner<E, A> {
    fn start(self, identity: A) {
        if let Some(proceed) = &self.proceed {
            match guard(|| proceed(&identity)) {
                Ok(true) => {}
                Ok(false) => return self.memo.complete(Ok(Arc::new(vec![identity]))),
                Err(error) => return self.memo.complete(Err(error)),
            }
        }
        let accumulate = Box::new(Accumulate {
            accumulator: Some(identity),
            combine: self.combine,
            proceed: self.proceed,
            memo: self.memo,
        });
        match self.direction {
            FoldDirection::Left => self.upstream.materialize_next_while(0, accumulate),
            FoldDirection::Right => self.upstream.materialize_prev_while(usize::MAX, accumulate),
        }
    }
}

impl<E: Element, A: Element> ListMaterializer<A> for FoldListMaterializer<E, A> {
    fn known_size(&self) -> Option<usize> {
        Some(1)
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

    fn materialize_element(&self, index: usize, target: BoxIndexedConsumer<A>) {
        self.materialize(serve_element(index, target));
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<A>>) {
        self.materialize(target);
    }

    fn materialize_next_while(&self, index: usize, predicate: BoxPredicate<A>) {
        self.materialize(serve_next_while(index, predicate));
    }

    fn materialize_prev_while(&self, index: usize, predicate: BoxPredicate<A>) {
        self.materialize(serve_prev_while(index, predicate));
    }

    fn weight_element(&self) -> usize {
        self.weight_elements()
    }

    fn weight_elements(&self) -> usize {
        let upstream = match self.direction {
            FoldDirection::Left => self.upstream.weight_next_while(),
            FoldDirection::Right => self.upstream.weight_prev_while(),
        };
        let seed = match &self.seed {
            Seed::Identity(_) => 0,
            Seed::List(seed) => seed.weight_element(),
        };
        upstream.saturating_add(seed).saturating_add(1)
    }
}

impl<E, A> fmt::Debug for FoldListMaterializer<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FoldListMaterializer")
            .field("direction", &self.direction)
            .field("memo", &self.memo)
            .finish_non_exhaustive()
    }
}

struct Accumulate<E, A> {
    accumulator: Option<A>,
    combine: Combiner<E, A>,
    proceed: Option<Proceed<A>>,
    memo: Arc<Memo<Elements<A>>>,
}

impl<E: Element, A: Element> Accumulate<E, A> {
    fn finish(&mut self) {
        if let Some(accumulator) = self.accumulator.take() {
            self.memo.complete(Ok(Arc::new(vec![accumulator])));
        }
    }
}

impl<E: Element, A: Element> IndexedFuturePredicate<E> for Accumulate<E, A> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: E) -> bool {
        let Some(accumulator) = self.accumulator.take() else {
            return false;
        };
        let combine = &self.combine;
        let proceed = &self.proceed;
        let step = guard(|| {
            let next = combine(accumulator, element);
            let more = proceed.as_ref().is_none_or(|proceed| proceed(&next));
            (next, more)
        });
        match step {
            Ok((next, more)) => {
                self.accumulator = Some(next);
                if !more {
                    self.finish();
                }
                more
            }
            Err(error) => {
                self.memo.complete(Err(error));
                false
            }
        }
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        self.finish();
    }

    fn error(self: Box<Self>, error: PipelineError) {
        self.memo.complete(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::consumer;
    use crate::materializer::list::{MapListMaterializer, ResidentListMaterializer};
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn fold_result<A: Element>(fold: &FoldListMaterializer<i32, A>) -> Vec<A> {
        let (sender, receiver) = mpsc::channel();
        fold.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        receiver.recv().unwrap().unwrap().to_vec()
    }

    fn letters() -> SharedList<i32> {
        Arc::new(ResidentListMaterializer::new(vec![1, 2, 3]))
    }

    #[rstest]
    #[case(FoldDirection::Left, "123")]
    #[case(FoldDirection::Right, "321")]
    fn direction_sets_order(#[case] direction: FoldDirection, #[case] expected: &str) {
        let fold = FoldListMaterializer::new(
            letters(),
            direction,
            String::new(),
            Arc::new(|mut text: String, digit: i32| {
                text.push_str(&digit.to_string());
                text
            }),
            None,
        );
        assert_eq!(fold_result(&fold), vec![expected.to_owned()]);
        assert_eq!(fold.known_size(), Some(1));
    }

    #[rstest]
    fn while_variant_stops_pulling() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulls);
        let counted: SharedList<i32> = Arc::new(MapListMaterializer::new(
            Arc::new(ResidentListMaterializer::new((1..=10).collect())),
            Arc::new(move |_: usize, value: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                value
            }),
        ));
        let fold = FoldListMaterializer::new(
            counted,
            FoldDirection::Left,
            0,
            Arc::new(|sum: i32, value: i32| sum + value),
            Some(Arc::new(|sum: &i32| *sum < 6)),
        );
        assert_eq!(fold_result(&fold), vec![6]);
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    fn seed_list_supplies_the_identity() {
        let seed: SharedList<String> = Arc::new(MapListMaterializer::new(
            Arc::new(ResidentListMaterializer::new(vec![7])),
            Arc::new(|_: usize, value: i32| value.to_string()),
        ));
        let fold = FoldListMaterializer::seeded(
            letters(),
            FoldDirection::Left,
            seed,
            Arc::new(|mut text: String, digit: i32| {
                text.push_str(&digit.to_string());
                text
            }),
            None,
        );
        assert_eq!(fold_result(&fold), vec!["7123".to_owned()]);
    }

    #[rstest]
    fn empty_seed_list_fails_the_fold() {
        let fold = FoldListMaterializer::seeded(
            letters(),
            FoldDirection::Left,
            Arc::new(ResidentListMaterializer::new(Vec::<i32>::new())),
            Arc::new(|sum: i32, value: i32| sum + value),
            None,
        );
        let (sender, receiver) = mpsc::channel();
        fold.materialize_elements(consumer(move |result| sender.send(result).unwrap()));
        assert_eq!(receiver.recv().unwrap(), Err(PipelineError::NoSuchElement));
    }

    #[rstest]
    fn failing_identity_condition_returns_identity() {
        let fold = FoldListMaterializer::new(
            letters(),
            FoldDirection::Left,
            100,
            Arc::new(|sum: i32, value: i32| sum + value),
            Some(Arc::new(|sum: &i32| *sum < 6)),
        );
        assert_eq!(fold_result(&fold), vec![100]);
    }
}
