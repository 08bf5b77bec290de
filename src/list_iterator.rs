//! A bidirectional cursor over a [`FutureList`].
//!
//! Unlike [`FutureIterator`](crate::iterator::FutureIterator), moving the
//! cursor consumes nothing: the underlying list memoizes what it computed, so
//! stepping back serves an element that is already known.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consumer::{BoxConsumer, Lookup, indexed_consumer};
use crate::error::{PipelineError, PipelineResult};
use crate::list::FutureList;
use crate::materializer::Element;

/// A cursor positioned between two elements of a list.
pub struct FutureListIterator<E: Element> {
    list: FutureList<E>,
    position: Mutex<usize>,
}

impl<E: Element> FutureListIterator<E> {
    /// A cursor over `list` positioned before the element at `index`.
    #[must_use]
    pub fn new(list: FutureList<E>, index: usize) -> Self {
        Self {
            list,
            position: Mutex::new(index),
        }
    }

    /// The index of the element [`FutureListIterator::next`] would return.
    #[must_use]
    pub fn next_index(&self) -> usize {
        *self.position.lock()
    }

    /// The index of the element [`FutureListIterator::previous`] would
    /// return, if any.
    #[must_use]
    pub fn previous_index(&self) -> Option<usize> {
        self.next_index().checked_sub(1)
    }

    /// Blocks until it is known whether an element follows the cursor.
    ///
    /// # Errors
    ///
    /// Returns the failure or cancellation of the list.
    pub fn has_next(&self) -> PipelineResult<bool> {
        let position = self.next_index();
        if let Some(size) = self.list.known_size()
            && !self.list.is_cancelled()
        {
            return Ok(position < size);
        }
        let materializer = Arc::clone(self.list.materializer());
        self.list.binding().wait(
            materializer.is_done(),
            materializer.weight_has_element(),
            None,
            move |target| materializer.materialize_has_element(position, target),
        )
    }

    /// Returns `true` if an element precedes the cursor.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.next_index() > 0
    }

    /// Blocks until the element after the cursor is available, then moves
    /// the cursor past it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchElement`] at the end of the list, or
    /// the failure or cancellation of the list.
    pub fn next(&self) -> PipelineResult<E> {
        let position = self.next_index();
        let element = self.lookup(position)?;
        *self.position.lock() = position + 1;
        Ok(element)
    }

    /// Blocks until the element before the cursor is available, then moves
    /// the cursor before it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchElement`] at the start of the list, or
    /// the failure or cancellation of the list.
    pub fn previous(&self) -> PipelineResult<E> {
        let index = self.previous_index().ok_or(PipelineError::NoSuchElement)?;
        let element = self.lookup(index)?;
        *self.position.lock() = index;
        Ok(element)
    }

    fn lookup(&self, index: usize) -> PipelineResult<E> {
        if self.list.known_size().is_some_and(|size| index >= size) && !self.list.is_cancelled() {
            return Err(PipelineError::NoSuchElement);
        }
        let materializer = Arc::clone(self.list.materializer());
        self.list.binding().wait(
            materializer.is_done(),
            materializer.weight_element(),
            None,
            move |target: BoxConsumer<E>| {
                materializer.materialize_element(
                    index,
                    indexed_consumer(move |result: PipelineResult<Lookup<E>>| match result {
                        Ok(Lookup::Found { element, .. }) => target.accept(element),
                        Ok(Lookup::Complete { .. }) => target.error(PipelineError::NoSuchElement),
                        Err(error) => target.error(error),
                    }),
                );
            },
        )
    }

    /// A cursor over the mapped list, at the same position.
    #[must_use]
    pub fn map<F, M>(&self, mapper: M) -> FutureListIterator<F>
    where
        F: Element,
        M: Fn(E) -> F + Send + Sync + 'static,
    {
        FutureListIterator::new(self.list.map(mapper), self.next_index())
    }

    /// A cursor over the elements after this cursor satisfying `condition`.
    #[must_use]
    pub fn filter<C>(&self, condition: C) -> Self
    where
        C: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::new(self.to_list().filter(condition), 0)
    }

    /// The elements after the cursor.
    #[must_use]
    pub fn to_list(&self) -> FutureList<E> {
        self.list.drop(self.next_index())
    }

    /// Requests cancellation of the underlying list.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.list.cancel(may_interrupt)
    }

    /// Returns `true` if the underlying list was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.list.is_cancelled()
    }
}

impl<E: Element> fmt::Debug for FutureListIterator<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FutureListIterator")
            .field("list", &self.list)
            .field("position", &self.next_index())
            .finish()
    }
}
