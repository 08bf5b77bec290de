//! # lazy-collections
//!
//! Lazily evaluated, asynchronously materialized collection pipelines.
//!
//! ## Overview
//!
//! Operations on a [`FutureList`](list::FutureList) or a
//! [`FutureIterator`](iterator::FutureIterator) do not compute anything: they
//! build a graph of materializers, deferred computation nodes that know how
//! to produce their elements on request. Work starts when a caller asks for
//! a result and runs on an [`ExecutionContext`](context::ExecutionContext).
//!
//! - **Façades**: [`FutureList`](list::FutureList),
//!   [`FutureIterator`](iterator::FutureIterator) and
//!   [`FutureListIterator`](list_iterator::FutureListIterator), cheap
//!   immutable handles around a materializer
//! - **Materializers**: the [`ListMaterializer`](materializer::ListMaterializer)
//!   and [`IteratorMaterializer`](materializer::IteratorMaterializer)
//!   contracts and their node implementations
//! - **Consumers**: the callback protocol results are delivered through
//! - **Cancellation**: a single assignment slot shared by a fluent chain
//! - **Blocking access**: `get`, `first`, `size`, ... wait for a result,
//!   with deadlock detection and timeouts
//!
//! ## Feature Flags
//!
//! - `runtime` (default): the tokio backed
//!   [`RuntimeContext`](context::runtime::RuntimeContext)
//! - `fxhash`: faster hashing for distinct-key bookkeeping
//!
//! ## Example
//!
//! ```rust
//! use lazy_collections::prelude::*;
//!
//! let context = InlineContext::new().into_shared();
//! let list = FutureList::of(context, vec![5, 1, 4, 2, 3])
//!     .filter(|value| value % 2 == 1)
//!     .sorted()
//!     .map(|value| value * 10);
//! assert_eq!(list.get().unwrap(), vec![10, 30, 50]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports the façades, the argument type and the execution contexts.
///
/// # Usage
///
/// ```rust
/// use lazy_collections::prelude::*;
/// ```
pub mod prelude {
    pub use crate::consumer::{Lookup, consumer, indexed_consumer, predicate};
    pub use crate::context::inline::InlineContext;
    pub use crate::context::{ExecutionContext, SharedContext};
    pub use crate::error::{PipelineError, PipelineResult};
    pub use crate::iterator::FutureIterator;
    pub use crate::list::FutureList;
    pub use crate::list_iterator::FutureListIterator;
    pub use crate::materializer::Element;
    pub use crate::source::Source;

    #[cfg(feature = "runtime")]
    pub use crate::context::runtime::RuntimeContext;
}

pub(crate) mod blocking;
pub mod cancel;
pub mod consumer;
pub mod context;
pub mod error;
pub mod iterator;
pub mod list;
pub mod list_iterator;
pub mod materializer;
pub mod source;

mod assertions {
    use static_assertions::assert_impl_all;

    use crate::cancel::CancellationSlot;
    use crate::context::TaskId;
    use crate::error::PipelineError;
    use crate::iterator::FutureIterator;
    use crate::list::FutureList;
    use crate::list_iterator::FutureListIterator;

    assert_impl_all!(FutureList<i32>: Send, Sync, Clone);
    assert_impl_all!(FutureIterator<i32>: Send, Sync);
    assert_impl_all!(FutureListIterator<i32>: Send, Sync);
    assert_impl_all!(CancellationSlot: Send, Sync);
    assert_impl_all!(PipelineError: Send, Sync, Clone);
    assert_impl_all!(TaskId: Send, Sync);
}
