//! Element-wise stepping: filtering, `take_while`, `drop_while`, distinct.
//!
//! A [`StepIteratorMaterializer`] runs a stateful step function over every
//! upstream element and decides, per element, whether to emit a value,
//! skip it or stop the iteration for good. Emitted elements are renumbered
//! from zero.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::collect_remaining;
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate, IndexedFuturePredicate};
use crate::error::{CancellationSignal, PipelineError, PipelineResult, guard};
use crate::materializer::{
    Element, Elements, IteratorMaterializer, SharedIterator, Status, test_element,
};

/// What to do with one upstream element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<F> {
    /// Emit a value downstream.
    Emit(F),
    /// Drop the element and go on.
    Skip,
    /// Drop the element and end the iteration.
    Stop,
}

type StepFn<E, F> = Box<dyn FnMut(usize, E) -> Step<F> + Send>;
type Pulled<F> = Box<dyn FnOnce(PipelineResult<Option<(usize, F)>>) + Send>;

struct StepState<F> {
    peeked: Option<(usize, F)>,
    emitted: usize,
    stopped: bool,
    failure: Option<PipelineError>,
}

struct Stepper<E, F> {
    step: Mutex<StepFn<E, F>>,
    state: Mutex<StepState<F>>,
}

/// The outcome of running the step function over one element.
enum Stepped<F> {
    Emit(usize, F),
    Skip,
    Stop,
    Failed(PipelineError),
}

impl<E: Element, F: Element> Stepper<E, F> {
    fn apply(&self, index: usize, element: E) -> Stepped<F> {
        let step = {
            let mut step = self.step.lock();
            guard(|| (*step)(index, element))
        };
        let mut state = self.state.lock();
        match step {
            Ok(Step::Emit(value)) => {
                let position = state.emitted;
                state.emitted += 1;
                Stepped::Emit(position, value)
            }
            Ok(Step::Skip) => Stepped::Skip,
            Ok(Step::Stop) => {
                state.stopped = true;
                Stepped::Stop
            }
            Err(error) => {
                state.failure.get_or_insert_with(|| error.clone());
                Stepped::Failed(error)
            }
        }
    }

    fn stop(&self) -> usize {
        let mut state = self.state.lock();
        state.stopped = true;
        state.emitted
    }

    fn emitted(&self) -> usize {
        self.state.lock().emitted
    }
}

/// Emits upstream elements selected and transformed by a step function.
pub struct StepIteratorMaterializer<E, F> {
    upstream: SharedIterator<E>,
    stepper: Arc<Stepper<E, F>>,
}

impl<E: Element, F: Element> StepIteratorMaterializer<E, F> {
    /// Creates a node running `step` over `(upstream index, element)`.
    pub fn new(
        upstream: SharedIterator<E>,
        step: impl FnMut(usize, E) -> Step<F> + Send + 'static,
    ) -> Self {
        Self {
            upstream,
            stepper: Arc::new(Stepper {
                step: Mutex::new(Box::new(step)),
                state: Mutex::new(StepState {
                    peeked: None,
                    emitted: 0,
                    stopped: false,
                    failure: None,
                }),
            }),
        }
    }

    /// Error or end already known without pulling.
    fn settled(&self) -> Option<PipelineResult<usize>> {
        let state = self.stepper.state.lock();
        if let Some(error) = &state.failure {
            return Some(Err(error.clone()));
        }
        (state.stopped && state.peeked.is_none()).then_some(Ok(state.emitted))
    }

    /// Pulls the next emitted element, or `None` at the end.
    fn pull(&self, target: Pulled<F>) {
        let peeked = self.stepper.state.lock().peeked.take();
        if let Some(peeked) = peeked {
            return target(Ok(Some(peeked)));
        }
        match self.settled() {
            Some(Ok(_)) => return target(Ok(None)),
            Some(Err(error)) => return target(Err(error)),
            None => {}
        }
        self.upstream.materialize_next_while(Box::new(PullOne {
            stepper: Arc::clone(&self.stepper),
            target: Some(target),
        }));
    }
}

impl<E: Element, F: Element> IteratorMaterializer<F> for StepIteratorMaterializer<E, F> {
    fn known_size(&self) -> Option<usize> {
        let state = self.stepper.state.lock();
        let peeked = usize::from(state.peeked.is_some());
        if state.stopped {
            return Some(peeked);
        }
        drop(state);
        match self.upstream.known_size() {
            Some(0) => Some(peeked),
            _ => None,
        }
    }

    fn is_materialized_at_once(&self) -> bool {
        self.upstream.is_materialized_at_once()
    }

    fn status(&self) -> Status {
        match self.stepper.state.lock().failure.as_ref() {
            Some(PipelineError::Cancelled(_)) => Status::Cancelled,
            Some(_) => Status::Failed,
            None => self.upstream.status(),
        }
    }

    fn materialize_cancel(&self, signal: &CancellationSignal) {
        self.stepper
            .state
            .lock()
            .failure
            .get_or_insert_with(|| PipelineError::Cancelled(signal.clone()));
        self.upstream.materialize_cancel(signal);
    }

    fn materialize_has_next(&self, target: BoxConsumer<bool>) {
        let stepper = Arc::clone(&self.stepper);
        self.pull(Box::new(move |result| match result {
            Ok(Some(peeked)) => {
                stepper.state.lock().peeked = Some(peeked);
                target.accept(true);
            }
            Ok(None) => target.accept(false),
            Err(error) => target.error(error),
        }));
    }

    fn materialize_next(&self, target: BoxIndexedConsumer<F>) {
        let stepper = Arc::clone(&self.stepper);
        self.pull(Box::new(move |result| match result {
            Ok(Some((index, element))) => target.accept(None, index, element),
            Ok(None) => target.complete(stepper.emitted()),
            Err(error) => target.error(error),
        }));
    }

    fn materialize_next_while(&self, mut downstream: BoxPredicate<F>) {
        let peeked = self.stepper.state.lock().peeked.take();
        if let Some((index, element)) = peeked {
            match test_element(&mut downstream, None, index, element) {
                Ok(true) => {}
                Ok(false) => return,
                Err(error) => return downstream.error(error),
            }
        }
        match self.settled() {
            Some(Ok(emitted)) => downstream.complete(emitted),
            Some(Err(error)) => downstream.error(error),
            None => self.upstream.materialize_next_while(Box::new(StepPredicate {
                stepper: Arc::clone(&self.stepper),
                downstream: Some(downstream),
            })),
        }
    }

    fn materialize_elements(&self, target: BoxConsumer<Elements<F>>) {
        collect_remaining(self, target);
    }

    fn weight_next(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }

    fn weight_elements(&self) -> usize {
        self.upstream.weight_next_while().saturating_add(1)
    }
}

/// Pulls upstream elements until one is emitted.
struct PullOne<E, F> {
    stepper: Arc<Stepper<E, F>>,
    target: Option<Pulled<F>>,
}

impl<E: Element, F: Element> IndexedFuturePredicate<E> for PullOne<E, F> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: E) -> bool {
        let outcome = match self.stepper.apply(index, element) {
            Stepped::Skip => return true,
            Stepped::Emit(position, value) => Ok(Some((position, value))),
            Stepped::Stop => Ok(None),
            Stepped::Failed(error) => Err(error),
        };
        if let Some(target) = self.target.take() {
            target(outcome);
        }
        false
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        self.stepper.stop();
        if let Some(target) = self.target.take() {
            target(Ok(None));
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(target) = self.target.take() {
            target(Err(error));
        }
    }
}

/// Feeds emitted elements to a downstream scan.
struct StepPredicate<E, F> {
    stepper: Arc<Stepper<E, F>>,
    downstream: Option<BoxPredicate<F>>,
}

impl<E: Element, F: Element> IndexedFuturePredicate<E> for StepPredicate<E, F> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: E) -> bool {
        let Some(downstream) = self.downstream.as_mut() else {
            return false;
        };
        match self.stepper.apply(index, element) {
            Stepped::Emit(position, value) => downstream.test(None, position, value),
            Stepped::Skip => true,
            Stepped::Stop => {
                if let Some(downstream) = self.downstream.take() {
                    downstream.complete(self.stepper.emitted());
                }
                false
            }
            Stepped::Failed(error) => {
                if let Some(downstream) = self.downstream.take() {
                    downstream.error(error);
                }
                false
            }
        }
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        let emitted = self.stepper.stop();
        if let Some(downstream) = self.downstream.take() {
            downstream.complete(emitted);
        }
    }

    fn error(mut self: Box<Self>, error: PipelineError) {
        if let Some(downstream) = self.downstream.take() {
            downstream.error(error);
        }
    }
}

impl<E, F> fmt::Debug for StepIteratorMaterializer<E, F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.stepper.state.lock();
        formatter
            .debug_struct("StepIteratorMaterializer")
            .field("emitted", &state.emitted)
            .field("stopped", &state.stopped)
            .field("peeked", &state.peeked.is_some())
            .finish_non_exhaustive()
    }
}
