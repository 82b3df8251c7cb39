//! Server-ward delta computation.

use crate::applier::{ClientEcho, ForcedSet};
use crate::content_state::ContentStateTracker;
use crate::data::{ControllerResult, DataController};
use pimsync_protocol::{CollectionKey, DataClass, DeviceId, ItemId, Timestamp};
use std::collections::BTreeSet;
use tracing::debug;

/// The add/change/delete sets of one server-ward delta.
///
/// Sets are ordered, so windowing drains identically across retries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaSet {
    /// Items the client has not received yet.
    pub adds: BTreeSet<ItemId>,
    /// Items changed since the client's last sync.
    pub changes: BTreeSet<ItemId>,
    /// Items the client holds that no longer exist server-side.
    pub deletes: BTreeSet<ItemId>,
}

impl DeltaSet {
    /// Total number of items across the three categories.
    pub fn total(&self) -> usize {
        self.adds.len() + self.changes.len() + self.deletes.len()
    }

    /// Returns true if no items remain in any category.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Folds a forced set in and enforces category precedence.
    ///
    /// Forced adds win: an id forced back into the add set is dropped
    /// from deletes and changes. An item new to the client is reported
    /// once, as an add, never also as a change.
    pub fn normalize(&mut self, forced: &ForcedSet) {
        self.adds.extend(forced.adds.iter().cloned());
        self.changes.extend(forced.changes.iter().cloned());

        for id in &self.adds {
            self.deletes.remove(id);
            self.changes.remove(id);
        }
    }
}

/// Computes the true server-ward delta for one collection.
///
/// Adds and deletes come from diffing the delivered-items ledger against
/// the controller's current id set; changes come from the controller's
/// modification timestamps. `since == None` selects full-snapshot mode
/// (first dialogue): the whole current id set is the add set.
///
/// Items the client itself just added or changed in this dialogue
/// (`echo`) are excluded so the engine never mirrors a mutation back in
/// the same round trip; forced items override that exclusion because
/// the server's authoritative copy must reach the client.
#[allow(clippy::too_many_arguments)]
pub fn compute_deltas(
    controller: &dyn DataController,
    ledger: &ContentStateTracker,
    device: &DeviceId,
    class: DataClass,
    collection: &CollectionKey,
    filter: u32,
    since: Option<Timestamp>,
    echo: &ClientEcho,
    forced: &ForcedSet,
) -> ControllerResult<DeltaSet> {
    let all_ids = controller.all_item_ids(collection, filter)?;
    let delivered = ledger.delivered_set(device, class, collection);

    let adds: BTreeSet<ItemId> = all_ids
        .iter()
        .filter(|id| !delivered.contains(*id) && !echo.added.contains(*id))
        .cloned()
        .collect();

    let (changes, deletes) = match since {
        Some(since) => {
            let deletes = delivered
                .iter()
                .filter(|id| !all_ids.contains(*id))
                .cloned()
                .collect();

            let changes = controller
                .changed_since(collection, since)?
                .into_iter()
                .filter(|id| {
                    !echo.changed.contains(id)
                        && !echo.added.contains(id)
                        && all_ids.contains(id)
                })
                .collect();

            (changes, deletes)
        }
        None => (BTreeSet::new(), BTreeSet::new()),
    };

    let mut delta = DeltaSet {
        adds,
        changes,
        deletes,
    };
    delta.normalize(forced);

    debug!(
        collection = %collection,
        adds = delta.adds.len(),
        changes = delta.changes.len(),
        deletes = delta.deletes.len(),
        "computed server-ward delta"
    );

    Ok(delta)
}
