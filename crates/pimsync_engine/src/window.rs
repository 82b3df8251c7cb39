//! Response windowing.

use crate::delta::DeltaSet;
use pimsync_protocol::ItemId;
use std::collections::BTreeSet;

fn take_up_to(source: &BTreeSet<ItemId>, budget: usize) -> (BTreeSet<ItemId>, BTreeSet<ItemId>) {
    let taken: BTreeSet<ItemId> = source.iter().take(budget).cloned().collect();
    let rest = source.difference(&taken).cloned().collect();
    (taken, rest)
}

/// Bounds a delta to at most `limit` items, in add → change → delete
/// order, returning the window and the remainder (if any).
///
/// Only the server-ward delta is throttled; acknowledgments for client
/// mutations are never windowed. The input sets are ordered, so the
/// same delta always splits the same way and retries drain identically.
pub fn split_window(delta: DeltaSet, limit: u32) -> (DeltaSet, Option<DeltaSet>) {
    let limit = limit as usize;
    if delta.total() <= limit {
        return (delta, None);
    }

    let mut budget = limit;
    let (adds, rest_adds) = take_up_to(&delta.adds, budget);
    budget -= adds.len();
    let (changes, rest_changes) = take_up_to(&delta.changes, budget);
    budget -= changes.len();
    let (deletes, rest_deletes) = take_up_to(&delta.deletes, budget);

    let window = DeltaSet {
        adds,
        changes,
        deletes,
    };
    let remainder = DeltaSet {
        adds: rest_adds,
        changes: rest_changes,
        deletes: rest_deletes,
    };

    (window, Some(remainder))
}
