//! List-shaped materializers.
//!
//! - [`ResidentListMaterializer`]: already materialized data
//! - [`TransformListMaterializer`]: lazy bulk transform of whole upstream results
//! - [`MapListMaterializer`], [`FilterListMaterializer`], [`DropListMaterializer`],
//!   [`TakeListMaterializer`], [`SliceListMaterializer`], [`FoldListMaterializer`],
//!   [`DistinctByListMaterializer`], [`SlidingWindowListMaterializer`],
//!   [`AppendAllListMaterializer`], [`FlatMapListMaterializer`],
//!   [`SetOperationListMaterializer`], [`ReversedListMaterializer`]:
//!   incremental operation nodes
//! - [`SortedListMaterializer`]: sorting, which needs the whole upstream
//! - [`SwitchListMaterializer`]: runs a foreign materializer on its own context
//! - [`IteratorListMaterializer`]: random access over a single pass iterator

mod append;
mod distinct;
mod drop;
mod filter;
mod flat_map;
mod fold;
mod iterator;
mod map;
mod resident;
mod reversed;
mod set_ops;
mod slice;
mod sliding;
mod sorted;
mod switch;
mod take;
mod transform;

pub use append::AppendAllListMaterializer;
pub use distinct::{DistinctByListMaterializer, KeyOf};
pub use drop::DropListMaterializer;
pub use filter::{Condition, FilterListMaterializer};
pub use flat_map::{Expander, FlatMapListMaterializer};
pub use fold::{Combiner, FoldDirection, FoldListMaterializer, Proceed};
pub use iterator::IteratorListMaterializer;
pub use map::{MapListMaterializer, Mapper};
pub use resident::ResidentListMaterializer;
pub use reversed::ReversedListMaterializer;
pub use set_ops::{SetOperation, SetOperationListMaterializer};
pub use slice::{SliceListMaterializer, normalize_bounds};
pub use sliding::{PaddedSplitter, SlidingWindowListMaterializer, Splitter, UnpaddedSplitter};
pub use sorted::{Comparator, SortedListMaterializer};
pub use switch::SwitchListMaterializer;
pub use take::TakeListMaterializer;
pub use transform::TransformListMaterializer;

pub(crate) use distinct::KeySet;
pub(crate) use sliding::{window_count, windows};

use super::{Element, Elements, lookup, scan_backward, scan_forward};
use crate::consumer::{BoxConsumer, BoxIndexedConsumer, BoxPredicate, consumer};
use crate::error::PipelineResult;

/// Adapts an elements consumer into an index lookup.
pub(crate) fn serve_element<E: Element>(
    index: usize,
    target: BoxIndexedConsumer<E>,
) -> BoxConsumer<Elements<E>> {
    consumer(move |result: PipelineResult<Elements<E>>| match result {
        Ok(elements) => lookup(&elements, index, target),
        Err(error) => target.error(error),
    })
}

/// Adapts an elements consumer into a forward scan.
pub(crate) fn serve_next_while<E: Element>(
    index: usize,
    target: BoxPredicate<E>,
) -> BoxConsumer<Elements<E>> {
    consumer(move |result: PipelineResult<Elements<E>>| match result {
        Ok(elements) => scan_forward(&elements, index, target),
        Err(error) => target.error(error),
    })
}

/// Adapts an elements consumer into a backward scan.
pub(crate) fn serve_prev_while<E: Element>(
    index: usize,
    target: BoxPredicate<E>,
) -> BoxConsumer<Elements<E>> {
    consumer(move |result: PipelineResult<Elements<E>>| match result {
        Ok(elements) => scan_backward(&elements, index, target),
        Err(error) => target.error(error),
    })
}
