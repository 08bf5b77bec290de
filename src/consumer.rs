//! Callback contracts through which materializers deliver results.
//!
//! Three protocols are used:
//!
//! - [`FutureConsumer`]: receives a single value or an error, exactly once.
//! - [`IndexedFutureConsumer`]: receives the element at an index, a
//!   "complete" notice carrying the sequence size when the index is past the
//!   end, or an error. Exactly one of the three is invoked.
//! - [`IndexedFuturePredicate`]: is tested element by element during a
//!   short-circuiting scan and finally receives either "complete" or an error,
//!   unless it stopped the scan itself by returning `false`.
//!
//! Single-shot callbacks consume `self: Box<Self>`, which makes "exactly once"
//! a compile-time property.
//!
//! Closures can be adapted with [`consumer`], [`indexed_consumer`] and
//! [`predicate`].
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::consumer::{consumer, FutureConsumer};
//! use std::sync::mpsc;
//!
//! let (sender, receiver) = mpsc::channel();
//! let callback = consumer(move |result: Result<i32, _>| sender.send(result).unwrap());
//! callback.accept(7);
//! assert_eq!(receiver.recv().unwrap(), Ok(7));
//! ```

use crate::error::{PipelineError, PipelineResult};

// =============================================================================
// Protocols
// =============================================================================

/// Receives a single result.
pub trait FutureConsumer<T>: Send {
    /// Delivers the value.
    fn accept(self: Box<Self>, value: T);

    /// Delivers the failure.
    fn error(self: Box<Self>, error: PipelineError);
}

/// Boxed [`FutureConsumer`].
pub type BoxConsumer<T> = Box<dyn FutureConsumer<T>>;

/// Receives the outcome of an index-addressed lookup.
pub trait IndexedFutureConsumer<T>: Send {
    /// Delivers the element found at `index`; `size` is the sequence size when known.
    fn accept(self: Box<Self>, size: Option<usize>, index: usize, element: T);

    /// Signals that the index is past the end of a sequence of `size` elements.
    fn complete(self: Box<Self>, size: usize);

    /// Delivers the failure.
    fn error(self: Box<Self>, error: PipelineError);
}

/// Boxed [`IndexedFutureConsumer`].
pub type BoxIndexedConsumer<T> = Box<dyn IndexedFutureConsumer<T>>;

/// Drives a short-circuiting scan.
pub trait IndexedFuturePredicate<T>: Send {
    /// Tests the element at `index`. Returning `false` stops the scan; the
    /// element passed in is considered consumed either way.
    fn test(&mut self, size: Option<usize>, index: usize, element: T) -> bool;

    /// Signals that the scan ran out of elements; `size` is the sequence size.
    fn complete(self: Box<Self>, size: usize);

    /// Delivers the failure that interrupted the scan.
    fn error(self: Box<Self>, error: PipelineError);
}

/// Boxed [`IndexedFuturePredicate`].
pub type BoxPredicate<T> = Box<dyn IndexedFuturePredicate<T>>;

// =============================================================================
// Lookup
// =============================================================================

/// The outcome of an index-addressed lookup, as seen by closure consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The element exists.
    Found {
        /// The sequence size, when known.
        size: Option<usize>,
        /// The element index.
        index: usize,
        /// The element.
        element: T,
    },
    /// The index is past the end of a sequence of `size` elements.
    Complete {
        /// The sequence size.
        size: usize,
    },
}

impl<T> Lookup<T> {
    /// Returns the element if found.
    pub fn into_element(self) -> Option<T> {
        match self {
            Self::Found { element, .. } => Some(element),
            Self::Complete { .. } => None,
        }
    }
}

// =============================================================================
// Closure adapters
// =============================================================================

struct FnConsumer<F>(F);

impl<T, F> FutureConsumer<T> for FnConsumer<F>
where
    F: FnOnce(PipelineResult<T>) + Send,
{
    fn accept(self: Box<Self>, value: T) {
        (self.0)(Ok(value));
    }

    fn error(self: Box<Self>, error: PipelineError) {
        (self.0)(Err(error));
    }
}

/// Adapts a closure into a [`BoxConsumer`].
pub fn consumer<T, F>(function: F) -> BoxConsumer<T>
where
    T: 'static,
    F: FnOnce(PipelineResult<T>) + Send + 'static,
{
    Box::new(FnConsumer(function))
}

struct FnIndexedConsumer<F>(F);

impl<T, F> IndexedFutureConsumer<T> for FnIndexedConsumer<F>
where
    F: FnOnce(PipelineResult<Lookup<T>>) + Send,
{
    fn accept(self: Box<Self>, size: Option<usize>, index: usize, element: T) {
        (self.0)(Ok(Lookup::Found {
            size,
            index,
            element,
        }));
    }

    fn complete(self: Box<Self>, size: usize) {
        (self.0)(Ok(Lookup::Complete { size }));
    }

    fn error(self: Box<Self>, error: PipelineError) {
        (self.0)(Err(error));
    }
}

/// Adapts a closure into a [`BoxIndexedConsumer`].
pub fn indexed_consumer<T, F>(function: F) -> BoxIndexedConsumer<T>
where
    T: 'static,
    F: FnOnce(PipelineResult<Lookup<T>>) + Send + 'static,
{
    Box::new(FnIndexedConsumer(function))
}

struct FnPredicate<P, D> {
    test: P,
    done: D,
}

impl<T, P, D> IndexedFuturePredicate<T> for FnPredicate<P, D>
where
    P: FnMut(Option<usize>, usize, T) -> bool + Send,
    D: FnOnce(PipelineResult<usize>) + Send,
{
    fn test(&mut self, size: Option<usize>, index: usize, element: T) -> bool {
        (self.test)(size, index, element)
    }

    fn complete(self: Box<Self>, size: usize) {
        (self.done)(Ok(size));
    }

    fn error(self: Box<Self>, error: PipelineError) {
        (self.done)(Err(error));
    }
}

/// Adapts a test closure and a completion closure into a [`BoxPredicate`].
///
/// `done` receives `Ok(size)` on completion or the error; it is not invoked
/// when `test` stops the scan by returning `false`.
pub fn predicate<T, P, D>(test: P, done: D) -> BoxPredicate<T>
where
    T: 'static,
    P: FnMut(Option<usize>, usize, T) -> bool + Send + 'static,
    D: FnOnce(PipelineResult<usize>) + Send + 'static,
{
    Box::new(FnPredicate { test, done })
}

// =============================================================================
// Delivery helpers
// =============================================================================

/// Delivers a result to a consumer.
pub(crate) fn deliver<T>(consumer: BoxConsumer<T>, result: PipelineResult<T>) {
    match result {
        Ok(value) => consumer.accept(value),
        Err(error) => consumer.error(error),
    }
}

/// Delivers a lookup outcome to an indexed consumer.
pub(crate) fn deliver_lookup<T>(consumer: BoxIndexedConsumer<T>, result: PipelineResult<Lookup<T>>) {
    match result {
        Ok(Lookup::Found {
            size,
            index,
            element,
        }) => consumer.accept(size, index, element),
        Ok(Lookup::Complete { size }) => consumer.complete(size),
        Err(error) => consumer.error(error),
    }
}

/// Delivers a scan outcome to a predicate.
pub(crate) fn finish_scan<T>(predicate: BoxPredicate<T>, result: PipelineResult<usize>) {
    match result {
        Ok(size) => predicate.complete(size),
        Err(error) => predicate.error(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::mpsc;

    #[rstest]
    fn indexed_consumer_reports_found_and_complete() {
        let (sender, receiver) = mpsc::channel();
        let found = sender.clone();
        indexed_consumer(move |result| found.send(result).unwrap()).accept(Some(3), 1, 'b');
        indexed_consumer(move |result| sender.send(result).unwrap()).complete(3);

        assert_eq!(
            receiver.recv().unwrap(),
            Ok(Lookup::Found {
                size: Some(3),
                index: 1,
                element: 'b'
            })
        );
        assert_eq!(receiver.recv().unwrap(), Ok(Lookup::Complete { size: 3 }));
    }

    #[rstest]
    fn predicate_adapter_tests_then_completes() {
        let (sender, receiver) = mpsc::channel();
        let mut seen = Vec::new();
        let mut scan = predicate(
            move |_, index, element: i32| {
                seen.push((index, element));
                element < 2
            },
            move |result| sender.send(result).unwrap(),
        );
        assert!(scan.test(None, 0, 1));
        assert!(!scan.test(None, 1, 2));
        scan.complete(2);
        assert_eq!(receiver.recv().unwrap(), Ok(2));
    }

    #[rstest]
    fn lookup_into_element() {
        assert_eq!(
            Lookup::Found {
                size: None,
                index: 0,
                element: 5
            }
            .into_element(),
            Some(5)
        );
        assert_eq!(Lookup::<i32>::Complete { size: 0 }.into_element(), None);
    }
}
