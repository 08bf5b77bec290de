#![cfg(feature = "runtime")]

use lazy_collections::consumer::consumer;
use lazy_collections::context::runtime::{RuntimeContext, is_interrupted};
use lazy_collections::context::SharedContext;
use lazy_collections::error::PipelineError;
use lazy_collections::iterator::FutureIterator;
use lazy_collections::list::FutureList;
use lazy_collections::materializer::SharedIterator;
use lazy_collections::materializer::iterator::{
    MapIteratorMaterializer, ResidentIteratorMaterializer,
};
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn context() -> SharedContext {
    RuntimeContext::new().into_shared()
}

/// A list whose elements are pulled one by one, counting every pull.
fn counted(context: SharedContext, values: Vec<i32>, pulls: &Arc<AtomicUsize>) -> FutureList<i32> {
    let counter = Arc::clone(pulls);
    let iterator: SharedIterator<i32> = Arc::new(MapIteratorMaterializer::new(
        Arc::new(ResidentIteratorMaterializer::new(values)),
        Arc::new(move |value: i32| {
            counter.fetch_add(1, Ordering::SeqCst);
            value
        }),
    ));
    FutureIterator::from_materializer(context, iterator).to_list()
}

// =============================================================================
// End to End
// =============================================================================

#[rstest]
fn pipeline_runs_on_the_runtime() {
    let list = FutureList::of(context(), (1..=10).collect())
        .filter(|value| value % 2 == 0)
        .map(|value| value * 3)
        .drop(1)
        .take(3);

    assert_eq!(list.get(), Ok(vec![12, 18, 24]));
    assert_eq!(list.size(), Ok(3));
    assert_eq!(list.first(), Ok(12));
    assert_eq!(list.last(), Ok(24));
    assert!(list.is_succeeded());
}

#[rstest]
fn incremental_pipeline_matches_bulk_pipeline() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let values: Vec<i32> = vec![7, 3, 9, 3, 1, 8, 2];
    let bulk = FutureList::of(context(), values.clone());
    let streamed = counted(context(), values, &pulls);

    for list in [bulk, streamed] {
        let result = list
            .distinct()
            .sorted()
            .reversed()
            .sliding(2, 2)
            .map(|window| window.iter().sum::<i32>());
        assert_eq!(result.get(), Ok(vec![17, 10, 3]));
    }
}

#[rstest]
fn fold_while_stops_pulling_upstream() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let list = counted(context(), (1..=100).collect(), &pulls);

    let sum = list.fold_left_while(0, |sum| *sum < 10, |sum, value| sum + value);

    assert_eq!(sum.get(), Ok(vec![10]));
    assert_eq!(pulls.load(Ordering::SeqCst), 4);
}

#[rstest]
fn exists_stops_at_the_first_match() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let list = counted(context(), (1..=100).collect(), &pulls);

    assert_eq!(list.exists(|value| *value == 3).get(), Ok(vec![true]));
    assert_eq!(pulls.load(Ordering::SeqCst), 3);
}

// =============================================================================
// Cancellation
// =============================================================================

#[rstest]
fn cancel_wakes_a_blocked_get() {
    let released = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&released);
    let list = FutureList::of(context(), vec![1]).map(move |value| {
        while !is_interrupted() && !gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        value
    });

    let waiter = {
        let list = list.clone();
        thread::spawn(move || list.get())
    };
    thread::sleep(Duration::from_millis(50));

    assert!(list.cancel(true));
    assert!(!list.cancel(true));
    let result = waiter.join().unwrap();
    released.store(true, Ordering::SeqCst);

    assert!(result.unwrap_err().is_cancelled());
    assert!(list.is_cancelled());
    assert!(list.is_done());
    assert!(list.get().unwrap_err().is_cancelled());
}

#[rstest]
fn one_cancel_wakes_every_blocked_facade_of_a_chain() {
    let released = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&released);
    let root = FutureList::of(context(), vec![1]).map(move |value| {
        while !is_interrupted() && !gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        value
    });
    let middle = root.map(|value| value + 1);
    let leaf = middle.filter(|value| *value > 0);

    let waiters: Vec<_> = [root.clone(), middle.clone(), leaf.clone()]
        .into_iter()
        .map(|list| thread::spawn(move || list.get()))
        .collect();
    thread::sleep(Duration::from_millis(50));

    assert!(leaf.cancel(true));
    let results: Vec<_> = waiters
        .into_iter()
        .map(|waiter| waiter.join().unwrap())
        .collect();
    released.store(true, Ordering::SeqCst);

    for result in results {
        assert!(result.unwrap_err().is_cancelled());
    }
    assert!(root.is_cancelled());
    assert!(middle.is_cancelled());
}

#[rstest]
fn cancellation_reaches_the_whole_chain_but_not_arguments() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let source = counted(context(), vec![1, 2, 3], &pulls);
    let argument = counted(context(), vec![4, 5], &pulls);
    let derived = source.filter(|value| *value > 1);
    let joined = derived.append_all(&argument);

    assert!(derived.cancel(false));
    assert!(source.is_cancelled());
    assert!(joined.get().unwrap_err().is_cancelled());
    assert!(!argument.is_cancelled());
    assert_eq!(argument.get(), Ok(vec![4, 5]));
}

#[rstest]
fn cancelling_a_done_list_is_refused() {
    let list = FutureList::of(context(), vec![1, 2]);
    assert!(list.is_done());
    assert!(!list.cancel(false));
    assert_eq!(list.get(), Ok(vec![1, 2]));
}

// =============================================================================
// Blocking Adapter
// =============================================================================

#[rstest]
fn blocking_inside_the_context_is_a_deadlock() {
    let context = context();
    let pending = FutureList::of(Arc::clone(&context), vec![1, 2, 3]).map(|value| value + 1);
    let resident = FutureList::of(Arc::clone(&context), vec![9]);
    let (sender, receiver) = mpsc::channel();

    FutureList::of(Arc::clone(&context), vec![0])
        .map(|value| value)
        .non_blocking_get(consumer(move |_| {
            let outcome = (pending.get(), resident.get());
            sender.send(outcome).unwrap();
        }));

    let (pending, resident) = receiver.recv_timeout(WAIT).unwrap();
    assert_eq!(pending, Err(PipelineError::Deadlock));
    assert_eq!(resident, Ok(vec![9]));
}

#[rstest]
fn blocking_on_a_switched_list_inside_its_context_is_a_deadlock() {
    let local = context();
    let switched = FutureList::of(context(), vec![1, 2, 3]).with_context(Arc::clone(&local));
    assert!(!switched.is_done());

    let (sender, receiver) = mpsc::channel();
    let blocked = switched.clone();
    FutureList::of(Arc::clone(&local), vec![0])
        .map(|value| value)
        .non_blocking_get(consumer(move |_| sender.send(blocked.get()).unwrap()));

    assert_eq!(receiver.recv_timeout(WAIT).unwrap(), Err(PipelineError::Deadlock));
    assert_eq!(switched.get(), Ok(vec![1, 2, 3]));
}

#[rstest]
fn switched_list_can_be_cancelled_before_it_ran() {
    let switched = FutureList::of(context(), vec![1, 2, 3]).with_context(context());

    assert!(switched.cancel(false));
    assert!(switched.get().unwrap_err().is_cancelled());
}

#[rstest]
fn concurrent_gets_join_one_computation() {
    let released = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&released);
    let mapped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&mapped);
    let incremented = Arc::new(AtomicUsize::new(0));
    let increments = Arc::clone(&incremented);
    let list = FutureList::of(context(), vec![1, 2, 3])
        .map(move |value| {
            while !gate.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            counter.fetch_add(1, Ordering::SeqCst);
            value * 10
        })
        .with_context(context())
        .map(move |value| {
            increments.fetch_add(1, Ordering::SeqCst);
            value + 1
        });
    assert!(!list.is_materialized_at_once());

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let list = list.clone();
            thread::spawn(move || list.get())
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    released.store(true, Ordering::SeqCst);

    let results: Vec<_> = waiters
        .into_iter()
        .map(|waiter| waiter.join().unwrap())
        .collect();
    assert_eq!(results[0], Ok(vec![11, 21, 31]));
    assert_eq!(results[0], results[1]);
    assert_eq!(mapped.load(Ordering::SeqCst), 3);
    assert_eq!(incremented.load(Ordering::SeqCst), 3);
}

#[rstest]
fn timed_get_gives_up_while_work_goes_on() {
    let list = FutureList::of(context(), vec![1, 2]).map(|value| {
        thread::sleep(Duration::from_millis(100));
        value * 2
    });
    let timeout = Duration::from_millis(10);

    assert_eq!(list.get_timeout(timeout), Err(PipelineError::Timeout(timeout)));
    assert_eq!(list.get_timeout(WAIT), Ok(vec![2, 4]));
}

#[rstest]
fn index_errors_are_reported() {
    let list = FutureList::of(context(), vec![1, 2, 3]).filter(|value| *value > 1);

    assert_eq!(list.get_at(1), Ok(3));
    assert!(list.get_at(5).unwrap_err().is_out_of_bounds());
    assert_eq!(
        FutureList::<i32>::empty(context()).first(),
        Err(PipelineError::NoSuchElement)
    );
}

#[rstest]
fn panicking_functions_fail_the_pipeline() {
    let list = FutureList::of(context(), vec![1, 2, 3]).map(|value| {
        assert!(value < 3, "too large");
        value
    });

    let error = list.get().unwrap_err();
    assert!(error.is_failed());
    assert!(list.is_failed());
    assert_eq!(list.get().unwrap_err(), error);
}

// =============================================================================
// Context Interop
// =============================================================================

#[rstest]
fn foreign_arguments_run_on_their_own_context() {
    let local = context();
    let foreign = context();
    let observer = Arc::clone(&foreign);
    let on_foreign = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&on_foreign);

    let argument = FutureList::of(foreign, vec![3, 4]).map(move |value| {
        flag.store(observer.is_current(), Ordering::SeqCst);
        value
    });
    let joined = FutureList::of(local, vec![1, 2])
        .filter(|_| true)
        .append_all(&argument);

    assert_eq!(joined.get(), Ok(vec![1, 2, 3, 4]));
    assert!(on_foreign.load(Ordering::SeqCst));
}

#[rstest]
fn with_context_moves_the_list() {
    let list = FutureList::of(context(), vec![1, 2, 3]).map(|value| value * 2);
    let moved = list.with_context(context());

    assert_eq!(moved.get(), Ok(vec![2, 4, 6]));
    assert_ne!(moved.task_id(), list.task_id());
}

// =============================================================================
// Non-blocking Access
// =============================================================================

#[rstest]
fn non_blocking_get_delivers_once() {
    let (sender, receiver) = mpsc::channel();
    FutureList::of(context(), vec![4, 2])
        .sorted()
        .non_blocking_get(consumer(move |result| sender.send(result).unwrap()));

    let delivered = receiver.recv_timeout(WAIT).unwrap();
    assert_eq!(delivered.map(|elements| elements.to_vec()), Ok(vec![2, 4]));
    assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn elements_async_resolves_without_blocking() {
    let list = FutureList::of(context(), vec![1, 2, 3]).map(|value| value * value);
    assert_eq!(list.elements_async().await, Ok(vec![1, 4, 9]));
}

#[rstest]
fn iterator_consumes_as_it_goes() {
    let iterator = FutureList::of(context(), (1..=6).collect())
        .iterator()
        .filter(|value| value % 2 == 1);

    assert_eq!(iterator.next(), Ok(1));
    assert_eq!(iterator.skip(1), Ok(1));
    assert_eq!(iterator.get(), Ok(vec![5]));
    assert_eq!(iterator.has_next(), Ok(false));
}
