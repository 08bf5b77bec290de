//! Property-based tests for the dispatch laws of `FutureList` and
//! `FutureIterator`.
//!
//! Every law compares a lazily built pipeline against the same computation
//! over a plain `Vec`, on the inline context.

use lazy_collections::context::SharedContext;
use lazy_collections::context::inline::InlineContext;
use lazy_collections::iterator::FutureIterator;
use lazy_collections::list::FutureList;
use proptest::prelude::*;
use std::sync::Arc;

fn inline() -> (Arc<InlineContext>, SharedContext) {
    let context = Arc::new(InlineContext::new());
    let shared: SharedContext = Arc::clone(&context) as SharedContext;
    (context, shared)
}

fn context() -> SharedContext {
    inline().1
}

/// A list with the given content whose size is not known upfront.
fn unsized_list(context: SharedContext, values: Vec<i32>) -> FutureList<i32> {
    FutureList::of(context, values).filter(|_| true)
}

fn reference_slice(values: &[i32], start: isize, end: isize) -> Vec<i32> {
    let length = values.len() as isize;
    let resolve = |bound: isize| {
        if bound < 0 {
            (length + bound).max(0)
        } else {
            bound.min(length)
        }
    };
    let from = resolve(start);
    let to = resolve(end);
    if from >= to {
        Vec::new()
    } else {
        values[from as usize..to as usize].to_vec()
    }
}

fn reference_diff(left: &[i32], right: &[i32]) -> Vec<i32> {
    let mut remaining = right.to_vec();
    left.iter()
        .filter(|value| match remaining.iter().position(|other| other == *value) {
            Some(position) => {
                remaining.remove(position);
                false
            }
            None => true,
        })
        .copied()
        .collect()
}

fn small_values() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(0..6i32, 0..16)
}

// =============================================================================
// Slice Normalization
// =============================================================================

proptest! {
    /// Slicing clamps bounds into the size and counts negative bounds from the end
    #[test]
    fn prop_slice_matches_reference(
        values in small_values(),
        start in -20isize..20,
        end in -20isize..20,
    ) {
        let expected = reference_slice(&values, start, end);

        let known = FutureList::of(context(), values.clone()).slice(start, end);
        let unknown = unsized_list(context(), values.clone()).slice(start, end);
        let iterated = FutureIterator::of(context(), values).slice(start, end);

        prop_assert_eq!(known.get().unwrap(), expected.clone());
        prop_assert_eq!(unknown.get().unwrap(), expected.clone());
        prop_assert_eq!(iterated.get().unwrap(), expected);
    }
}

// =============================================================================
// Size Arithmetic
// =============================================================================

proptest! {
    /// Appending one element adds exactly one to a known size
    #[test]
    fn prop_append_adds_one(values in small_values(), element in any::<i32>()) {
        let list = FutureList::of(context(), values.clone()).append(element);

        let mut expected = values.clone();
        expected.push(element);
        prop_assert_eq!(list.known_size(), Some(values.len() + 1));
        prop_assert_eq!(list.get().unwrap(), expected);
    }

    /// Appending a resident collection adds its length
    #[test]
    fn prop_append_all_adds_lengths(left in small_values(), right in small_values()) {
        let list = FutureList::of(context(), left.clone()).append_all(right.clone());

        prop_assert_eq!(list.known_size(), Some(left.len() + right.len()));
        prop_assert_eq!(list.get().unwrap(), [left, right].concat());
    }

    /// Drop and take compute their size from the known upstream size
    #[test]
    fn prop_drop_take_sizes(values in small_values(), count in 0usize..20) {
        let list = FutureList::of(context(), values.clone());

        prop_assert_eq!(list.drop(count).known_size(), Some(values.len().saturating_sub(count)));
        prop_assert_eq!(list.take(count).known_size(), Some(values.len().min(count)));
    }
}

// =============================================================================
// Known Empty Short Circuit
// =============================================================================

proptest! {
    /// A statically empty list gives the same results as a list found empty
    /// at materialization time, without scheduling anything
    #[test]
    fn prop_known_empty_matches_found_empty(
        hidden in small_values(),
        count in 0usize..5,
        identity in any::<i32>(),
    ) {
        let (counter, shared) = inline();
        let known = FutureList::<i32>::empty(Arc::clone(&shared));
        let found = FutureList::of(context(), hidden).filter(|_| false);

        prop_assert_eq!(known.map(|value| value + 1).get(), found.map(|value| value + 1).get());
        prop_assert_eq!(known.sorted().get(), found.sorted().get());
        prop_assert_eq!(known.reversed().get(), found.reversed().get());
        prop_assert_eq!(known.distinct().get(), found.distinct().get());
        prop_assert_eq!(known.drop(count).get(), found.drop(count).get());
        prop_assert_eq!(known.take(count).get(), found.take(count).get());
        prop_assert_eq!(
            known.fold_left(identity, |sum, value| sum.wrapping_add(value)).get(),
            found.fold_left(identity, |sum, value| sum.wrapping_add(value)).get()
        );
        prop_assert_eq!(counter.scheduled_count(), 0);
    }
}

// =============================================================================
// Set Algebra
// =============================================================================

proptest! {
    /// Set operations against an empty side reduce to the other side
    #[test]
    fn prop_set_algebra_with_empty_side(values in small_values()) {
        let list = FutureList::of(context(), values.clone());
        let empty = FutureList::<i32>::empty(context());

        prop_assert_eq!(list.diff(Vec::<i32>::new()).get().unwrap(), values.clone());
        prop_assert_eq!(list.intersect(Vec::<i32>::new()).get().unwrap(), Vec::<i32>::new());
        prop_assert_eq!(list.union(Vec::<i32>::new()).get().unwrap(), values.clone());
        prop_assert_eq!(empty.diff(values.clone()).get().unwrap(), Vec::<i32>::new());
        prop_assert_eq!(empty.union(values.clone()).get().unwrap(), values);
    }

    /// Difference removes one left occurrence per right occurrence
    #[test]
    fn prop_diff_is_multiset_difference(left in small_values(), right in small_values()) {
        let expected = reference_diff(&left, &right);
        let list = FutureList::of(context(), left.clone());
        let argument = FutureList::of(context(), right.clone());

        prop_assert_eq!(list.diff(right.clone()).get().unwrap(), expected.clone());
        prop_assert_eq!(unsized_list(context(), left).diff(&argument).get().unwrap(), expected);
    }

    /// Union keeps the left side and appends what it lacks
    #[test]
    fn prop_union_extends_left(left in small_values(), right in small_values()) {
        let union = FutureList::of(context(), left.clone()).union(right.clone()).get().unwrap();

        let mut expected = left.clone();
        expected.extend(reference_diff(&right, &left));
        prop_assert_eq!(union, expected);
    }
}

// =============================================================================
// Ordering and Aggregation
// =============================================================================

proptest! {
    /// Sorting agrees with the standard library on both dispatch paths
    #[test]
    fn prop_sorted_matches_std(values in small_values()) {
        let mut expected = values.clone();
        expected.sort_unstable();

        let known = FutureList::of(context(), values.clone()).sorted();
        let unknown = unsized_list(context(), values).sorted();

        prop_assert_eq!(known.get().unwrap(), expected.clone());
        prop_assert_eq!(unknown.get().unwrap(), expected);
    }

    /// Distinct keeps first occurrences in order
    #[test]
    fn prop_distinct_keeps_first_occurrences(values in small_values()) {
        let mut expected: Vec<i32> = Vec::new();
        for value in &values {
            if !expected.contains(value) {
                expected.push(*value);
            }
        }

        let listed = unsized_list(context(), values.clone()).distinct();
        let iterated = FutureIterator::of(context(), values).distinct();

        prop_assert_eq!(listed.get().unwrap(), expected.clone());
        prop_assert_eq!(iterated.get().unwrap(), expected);
    }

    /// Folds agree with sequential accumulation in both directions
    #[test]
    fn prop_folds_match_std(values in small_values()) {
        let list = unsized_list(context(), values.clone());
        let left = values.iter().fold(String::new(), |text, value| format!("{text}{value}"));
        let right = values.iter().rev().fold(String::new(), |text, value| format!("{text}{value}"));

        prop_assert_eq!(
            list.fold_left(String::new(), |text, value| format!("{text}{value}")).get().unwrap(),
            vec![left]
        );
        prop_assert_eq!(
            list.fold_right(String::new(), |text, value| format!("{text}{value}")).get().unwrap(),
            vec![right]
        );
    }

    /// Windows start at every multiple of the step inside the sequence
    #[test]
    fn prop_sliding_window_count(values in small_values(), size in 1usize..5, step in 1usize..5) {
        let windows = FutureList::of(context(), values.clone()).sliding(size, step).get().unwrap();

        prop_assert_eq!(windows.len(), values.len().div_ceil(step));
        for (position, window) in windows.iter().enumerate() {
            let start = position * step;
            let end = (start + size).min(values.len());
            prop_assert_eq!(&window[..], &values[start..end]);
        }
    }
}
