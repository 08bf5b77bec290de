//! Arguments of binary operations.
//!
//! Operations such as [`FutureList::append_all`] or [`FutureList::diff`]
//! accept either a plain resident collection or another list façade. The two
//! are dispatched differently: a resident argument can be folded into a bulk
//! transform, while a façade argument keeps its own laziness (and its own
//! execution context).
//!
//! # Examples
//!
//! ```rust
//! use lazy_collections::source::Source;
//!
//! let source: Source<i32> = vec![1, 2, 3].into();
//! assert_eq!(source.known_size(), Some(3));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::list::FutureList;
use crate::materializer::{Element, Elements};

/// A sequence passed as an operation argument.
#[derive(Clone)]
pub enum Source<E: Element> {
    /// Data already in memory.
    Resident(Elements<E>),
    /// Another lazily materialized list.
    List(FutureList<E>),
}

impl<E: Element> Source<E> {
    /// The size of the argument when it can be told without work.
    #[must_use]
    pub fn known_size(&self) -> Option<usize> {
        match self {
            Self::Resident(elements) => Some(elements.len()),
            Self::List(list) => list.known_size(),
        }
    }

    /// Returns `true` if the argument is known to be empty.
    #[must_use]
    pub fn is_known_empty(&self) -> bool {
        self.known_size() == Some(0)
    }
}

impl<E: Element> From<Vec<E>> for Source<E> {
    fn from(elements: Vec<E>) -> Self {
        Self::Resident(Arc::new(elements))
    }
}

impl<E: Element> From<&[E]> for Source<E> {
    fn from(elements: &[E]) -> Self {
        Self::Resident(Arc::new(elements.to_vec()))
    }
}

impl<E: Element, const N: usize> From<[E; N]> for Source<E> {
    fn from(elements: [E; N]) -> Self {
        Self::Resident(Arc::new(elements.into()))
    }
}

impl<E: Element> From<Elements<E>> for Source<E> {
    fn from(elements: Elements<E>) -> Self {
        Self::Resident(elements)
    }
}

impl<E: Element> From<FutureList<E>> for Source<E> {
    fn from(list: FutureList<E>) -> Self {
        Self::List(list)
    }
}

impl<E: Element> From<&FutureList<E>> for Source<E> {
    fn from(list: &FutureList<E>) -> Self {
        Self::List(list.clone())
    }
}

impl<E: Element> fmt::Debug for Source<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resident(elements) => formatter
                .debug_struct("Resident")
                .field("len", &elements.len())
                .finish(),
            Self::List(list) => formatter.debug_tuple("List").field(list).finish(),
        }
    }
}
