//! Applies client-submitted commands through the data controller.

use crate::content_state::ContentStateTracker;
use crate::data::{ControllerError, DataController};
use crate::error::{EngineError, EngineResult};
use pimsync_protocol::{
    AddCommand, AddResponse, ChangeResponse, CollectionKey, CommandBatch, CommandStatus,
    DataClass, DeleteResponse, DeviceId, ItemId, Payload,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Ids the client itself touched in this dialogue.
///
/// The delta computer excludes them so a client's own mutation is never
/// mirrored back as a server change in the same round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEcho {
    /// Server ids of successfully applied adds.
    pub added: BTreeSet<ItemId>,
    /// Server ids of successfully applied changes.
    pub changed: BTreeSet<ItemId>,
}

/// Ids queued for forced inclusion in the next server-ward delta
/// because a client mutation against them was rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedSet {
    /// Denied deletes: the server's copy must be re-sent as an add.
    pub adds: BTreeSet<ItemId>,
    /// Denied changes: the authoritative version must be re-sent.
    pub changes: BTreeSet<ItemId>,
}

impl ForcedSet {
    /// Returns true if nothing is forced.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.changes.is_empty()
    }
}

/// Everything one command batch produced.
#[derive(Debug, Default)]
pub struct AppliedBatch {
    /// Per-item outcomes for adds.
    pub add_responses: Vec<AddResponse>,
    /// Per-item outcomes for changes.
    pub change_responses: Vec<ChangeResponse>,
    /// Per-item outcomes for deletes.
    pub delete_responses: Vec<DeleteResponse>,
    /// Ids requested for full-payload fetch, resolved at response time.
    pub fetch_ids: Vec<ItemId>,
    /// Ids the client touched, for same-dialogue echo suppression.
    pub echo: ClientEcho,
    /// Ids forced into the next delta by rejected mutations.
    pub forced: ForcedSet,
}

/// Applies one collection's command batch.
///
/// Every command resolves to a per-item status; a single item's failure
/// never blocks the rest of the batch. The only batch-level failure is
/// the controller's backing store going away, which aborts the
/// collection dialogue so the cursor stays untouched.
pub struct ChangeApplier<'a> {
    controller: &'a dyn DataController,
    ledger: &'a ContentStateTracker,
    device: &'a DeviceId,
    class: DataClass,
    collection: &'a CollectionKey,
}

impl<'a> ChangeApplier<'a> {
    /// Creates an applier scoped to one collection dialogue.
    pub fn new(
        controller: &'a dyn DataController,
        ledger: &'a ContentStateTracker,
        device: &'a DeviceId,
        class: DataClass,
        collection: &'a CollectionKey,
    ) -> Self {
        Self {
            controller,
            ledger,
            device,
            class,
            collection,
        }
    }

    /// Applies the batch. `cursor` is the client-submitted cursor; 0
    /// selects first-sync dedup semantics for adds.
    pub fn apply(&self, cursor: u64, commands: &CommandBatch) -> EngineResult<AppliedBatch> {
        let mut batch = AppliedBatch::default();

        if commands.is_empty() {
            return Ok(batch);
        }
        info!(
            collection = %self.collection,
            adds = commands.adds.len(),
            changes = commands.changes.len(),
            deletes = commands.deletes.len(),
            fetches = commands.fetches.len(),
            "applying client commands"
        );

        for add in &commands.adds {
            let response = self.apply_add(cursor, add)?;
            if response.status == CommandStatus::Success {
                if let Some(id) = &response.server_id {
                    batch.echo.added.insert(id.clone());
                }
            }
            batch.add_responses.push(response);
        }

        for change in &commands.changes {
            let status = self.apply_change(&change.server_id, &change.payload)?;
            match status {
                CommandStatus::Success => {
                    batch.echo.changed.insert(change.server_id.clone());
                }
                CommandStatus::Conflict => {
                    batch.forced.changes.insert(change.server_id.clone());
                }
                _ => {}
            }
            batch.change_responses.push(ChangeResponse {
                server_id: change.server_id.clone(),
                status,
            });
        }

        for delete in &commands.deletes {
            let status = self.apply_delete(&delete.server_id)?;
            if status == CommandStatus::Conflict {
                batch.forced.adds.insert(delete.server_id.clone());
            }
            batch.delete_responses.push(DeleteResponse {
                server_id: delete.server_id.clone(),
                status,
            });
        }

        batch.fetch_ids = commands
            .fetches
            .iter()
            .map(|fetch| fetch.server_id.clone())
            .collect();

        Ok(batch)
    }

    fn apply_add(&self, cursor: u64, add: &AddCommand) -> EngineResult<AddResponse> {
        // On the very first dialogue the client may re-submit items the
        // server already holds; match them instead of duplicating.
        if cursor == 0 {
            match self.controller.find_matching(self.collection, &add.payload) {
                Ok(Some(existing)) => {
                    debug!(
                        collection = %self.collection,
                        item = %existing,
                        "reusing matching item for first-sync add"
                    );
                    self.ledger.mark_delivered(
                        self.device,
                        self.class,
                        self.collection,
                        existing.clone(),
                    );
                    return Ok(AddResponse {
                        client_ref: add.client_ref.clone(),
                        server_id: Some(existing),
                        status: CommandStatus::Success,
                    });
                }
                Ok(None) => {}
                Err(err) if err.is_fatal() => return Err(self.fatal(err)),
                Err(err) => {
                    warn!(collection = %self.collection, error = %err, "first-sync dedup lookup failed");
                }
            }
        }

        match self.controller.create(self.collection, &add.payload) {
            Ok(id) => {
                self.ledger
                    .mark_delivered(self.device, self.class, self.collection, id.clone());
                Ok(AddResponse {
                    client_ref: add.client_ref.clone(),
                    server_id: Some(id),
                    status: CommandStatus::Success,
                })
            }
            Err(err) if err.is_fatal() => Err(self.fatal(err)),
            Err(err) => {
                warn!(
                    collection = %self.collection,
                    client_ref = %add.client_ref,
                    error = %err,
                    "failed to add item"
                );
                Ok(AddResponse {
                    client_ref: add.client_ref.clone(),
                    server_id: None,
                    status: CommandStatus::ServerError,
                })
            }
        }
    }

    fn apply_change(&self, item: &ItemId, payload: &Payload) -> EngineResult<CommandStatus> {
        match self.controller.update(self.collection, item, payload) {
            Ok(()) => Ok(CommandStatus::Success),
            Err(ControllerError::AccessDenied) => {
                // The client's edit is refused; queue the authoritative
                // copy so the client converges back to the server state.
                info!(collection = %self.collection, item = %item, "change denied, forcing server copy");
                Ok(CommandStatus::Conflict)
            }
            Err(ControllerError::NotFound) => {
                // The item will surface in the delete delta by itself.
                Ok(CommandStatus::NotFound)
            }
            Err(err) if err.is_fatal() => Err(self.fatal(err)),
            Err(err) => {
                warn!(collection = %self.collection, item = %item, error = %err, "failed to change item");
                Ok(CommandStatus::ServerError)
            }
        }
    }

    fn apply_delete(&self, item: &ItemId) -> EngineResult<CommandStatus> {
        let status = match self.controller.delete(self.collection, item) {
            Ok(()) => CommandStatus::Success,
            Err(ControllerError::NotFound) => {
                // End state matches what the client wanted.
                info!(collection = %self.collection, item = %item, "delete of unknown item, treating as done");
                CommandStatus::Success
            }
            Err(ControllerError::AccessDenied) => {
                info!(collection = %self.collection, item = %item, "delete denied, forcing re-add");
                CommandStatus::Conflict
            }
            Err(err) if err.is_fatal() => return Err(self.fatal(err)),
            Err(err) => {
                warn!(collection = %self.collection, item = %item, error = %err, "failed to delete item");
                CommandStatus::ServerError
            }
        };

        // The client no longer holds the item in any of these outcomes;
        // a denied delete is re-sent through the forced add, which marks
        // it delivered again on emission.
        if status != CommandStatus::ServerError {
            self.ledger.unmark(self.device, self.class, self.collection, item);
        }
        Ok(status)
    }

    fn fatal(&self, err: ControllerError) -> EngineError {
        warn!(collection = %self.collection, error = %err, "data controller became unavailable");
        EngineError::ControllerUnavailable {
            class: self.class,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryController;
    use pimsync_protocol::{ChangeCommand, DeleteCommand, FetchCommand};

    struct Fixture {
        controller: MemoryController,
        ledger: ContentStateTracker,
        device: DeviceId,
        collection: CollectionKey,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                controller: MemoryController::new(),
                ledger: ContentStateTracker::new(),
                device: DeviceId::from("d1"),
                collection: CollectionKey::from("c1"),
            }
        }

        fn apply(&self, cursor: u64, commands: &CommandBatch) -> EngineResult<AppliedBatch> {
            let applier = ChangeApplier::new(
                &self.controller,
                &self.ledger,
                &self.device,
                DataClass::Contacts,
                &self.collection,
            );
            applier.apply(cursor, commands)
        }

        fn delivered(&self) -> BTreeSet<ItemId> {
            self.ledger
                .delivered_set(&self.device, DataClass::Contacts, &self.collection)
        }
    }

    fn add(client_ref: &str, payload: u8) -> AddCommand {
        AddCommand {
            client_ref: client_ref.into(),
            payload: vec![payload],
        }
    }

    #[test]
    fn add_creates_and_marks_delivered() {
        let fixture = Fixture::new();
        let commands = CommandBatch {
            adds: vec![add("r1", 1)],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(3, &commands).unwrap();
        let response = &batch.add_responses[0];

        assert_eq!(response.status, CommandStatus::Success);
        assert_eq!(response.client_ref, "r1");
        let id = response.server_id.clone().unwrap();
        assert!(batch.echo.added.contains(&id));
        assert!(fixture.delivered().contains(&id));
        assert_eq!(fixture.controller.len(&fixture.collection), 1);
    }

    #[test]
    fn first_sync_add_dedups_against_existing() {
        let fixture = Fixture::new();
        fixture.controller.seed(&fixture.collection, "existing", vec![1]);

        let commands = CommandBatch {
            adds: vec![add("r1", 1)],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(0, &commands).unwrap();
        let response = &batch.add_responses[0];

        assert_eq!(response.status, CommandStatus::Success);
        assert_eq!(response.server_id, Some(ItemId::from("existing")));
        // No duplicate was created.
        assert_eq!(fixture.controller.len(&fixture.collection), 1);
    }

    #[test]
    fn later_sync_add_skips_dedup() {
        let fixture = Fixture::new();
        fixture.controller.seed(&fixture.collection, "existing", vec![1]);

        let commands = CommandBatch {
            adds: vec![add("r1", 1)],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(2, &commands).unwrap();
        assert_eq!(batch.add_responses[0].status, CommandStatus::Success);
        assert_eq!(fixture.controller.len(&fixture.collection), 2);
    }

    #[test]
    fn failed_add_does_not_abort_the_batch() {
        let fixture = Fixture::new();
        fixture.controller.set_fail_creates(true);

        let commands = CommandBatch {
            adds: vec![add("r1", 1), add("r2", 2)],
            deletes: vec![DeleteCommand {
                server_id: ItemId::from("ghost"),
            }],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(4, &commands).unwrap();

        assert_eq!(batch.add_responses.len(), 2);
        for response in &batch.add_responses {
            assert_eq!(response.status, CommandStatus::ServerError);
            assert!(response.server_id.is_none());
        }
        // The delete still ran: not-found collapses to success.
        assert_eq!(batch.delete_responses[0].status, CommandStatus::Success);
    }

    #[test]
    fn change_outcomes() {
        let fixture = Fixture::new();
        fixture.controller.seed(&fixture.collection, "ok", vec![1]);
        fixture.controller.seed(&fixture.collection, "locked", vec![2]);
        fixture.controller.deny_mutations("locked");

        let commands = CommandBatch {
            changes: vec![
                ChangeCommand {
                    server_id: ItemId::from("ok"),
                    payload: vec![9],
                },
                ChangeCommand {
                    server_id: ItemId::from("locked"),
                    payload: vec![9],
                },
                ChangeCommand {
                    server_id: ItemId::from("gone"),
                    payload: vec![9],
                },
            ],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(2, &commands).unwrap();

        assert_eq!(batch.change_responses[0].status, CommandStatus::Success);
        assert_eq!(batch.change_responses[1].status, CommandStatus::Conflict);
        assert_eq!(batch.change_responses[2].status, CommandStatus::NotFound);

        assert!(batch.echo.changed.contains(&ItemId::from("ok")));
        assert_eq!(
            batch.forced.changes,
            BTreeSet::from([ItemId::from("locked")])
        );
        // The denied edit did not go through.
        assert_eq!(
            fixture.controller.get(&fixture.collection, &ItemId::from("locked")),
            Some(vec![2])
        );
    }

    #[test]
    fn delete_outcomes() {
        let fixture = Fixture::new();
        fixture.controller.seed(&fixture.collection, "plain", vec![1]);
        fixture.controller.seed(&fixture.collection, "locked", vec![2]);
        fixture.controller.deny_mutations("locked");
        for id in ["plain", "locked", "gone"] {
            fixture.ledger.mark_delivered(
                &fixture.device,
                DataClass::Contacts,
                &fixture.collection,
                ItemId::from(id),
            );
        }

        let commands = CommandBatch {
            deletes: vec![
                DeleteCommand {
                    server_id: ItemId::from("plain"),
                },
                DeleteCommand {
                    server_id: ItemId::from("gone"),
                },
                DeleteCommand {
                    server_id: ItemId::from("locked"),
                },
            ],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(2, &commands).unwrap();

        assert_eq!(batch.delete_responses[0].status, CommandStatus::Success);
        assert_eq!(batch.delete_responses[1].status, CommandStatus::Success);
        assert_eq!(batch.delete_responses[2].status, CommandStatus::Conflict);

        assert_eq!(batch.forced.adds, BTreeSet::from([ItemId::from("locked")]));
        // Every delete unmarked the ledger; the forced re-add restores
        // the mark when it is emitted.
        assert!(fixture.delivered().is_empty());
        // The denied item is still on the server.
        assert_eq!(fixture.controller.len(&fixture.collection), 1);
    }

    #[test]
    fn fetches_are_collected_not_applied() {
        let fixture = Fixture::new();
        let commands = CommandBatch {
            fetches: vec![
                FetchCommand {
                    server_id: ItemId::from("a"),
                },
                FetchCommand {
                    server_id: ItemId::from("b"),
                },
            ],
            ..CommandBatch::default()
        };

        let batch = fixture.apply(2, &commands).unwrap();
        assert_eq!(batch.fetch_ids, vec![ItemId::from("a"), ItemId::from("b")]);
    }

    #[test]
    fn unavailable_store_aborts_the_batch() {
        let fixture = Fixture::new();
        fixture.controller.set_unavailable(true);

        let commands = CommandBatch {
            adds: vec![add("r1", 1)],
            ..CommandBatch::default()
        };

        let err = fixture.apply(2, &commands).unwrap_err();
        assert!(matches!(err, EngineError::ControllerUnavailable { .. }));
    }
}
