//! Drives one sync dialogue end to end.

use crate::applier::ChangeApplier;
use crate::config::SyncConfig;
use crate::content_state::ContentStateTracker;
use crate::continuation::{Continuation, ContinuationStore};
use crate::cursor::CursorStore;
use crate::data::{ControllerError, ControllerRegistry, DataController};
use crate::delta::{compute_deltas, DeltaSet};
use crate::device::DeviceRegistry;
use crate::error::{EngineError, EngineResult};
use crate::folder::FolderRegistry;
use crate::window::split_window;
use parking_lot::Mutex;
use pimsync_protocol::{
    CollectionKey, CollectionSyncRequest, CollectionSyncResponse, CommandStatus, DataClass,
    DeviceId, FetchResponse, ItemId, Payload, ServerItem, SyncRequest, SyncResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The protocol orchestrator.
///
/// Owns the cross-request state (cursors, delivery ledger, folder
/// registry, continuations, devices) and resolves per-class storage
/// through the injected [`ControllerRegistry`]. One instance serves all
/// devices; there is no global state anywhere.
///
/// Dialogues for the same (device, collection) are serialized through a
/// per-key mutex so a retried request can never race its original past
/// the cursor check. Different collections proceed independently.
pub struct SyncEngine {
    config: SyncConfig,
    controllers: ControllerRegistry,
    devices: DeviceRegistry,
    cursors: CursorStore,
    content_state: ContentStateTracker,
    folders: FolderRegistry,
    continuations: ContinuationStore,
    collection_locks: Mutex<HashMap<(DeviceId, CollectionKey), Arc<Mutex<()>>>>,
}

impl SyncEngine {
    /// Creates an engine over the given controller registry.
    pub fn new(config: SyncConfig, controllers: ControllerRegistry) -> Self {
        let continuations = ContinuationStore::new(config.continuation_ttl);
        Self {
            config,
            controllers,
            devices: DeviceRegistry::new(),
            cursors: CursorStore::new(),
            content_state: ContentStateTracker::new(),
            folders: FolderRegistry::new(),
            continuations,
            collection_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The device registry.
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// The folder registry; the external folder-discovery component
    /// feeds collection metadata through this.
    pub fn folders(&self) -> &FolderRegistry {
        &self.folders
    }

    /// The cursor store.
    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// The delivered-items ledger.
    pub fn content_state(&self) -> &ContentStateTracker {
        &self.content_state
    }

    /// Removes a device and every piece of sync state it owns.
    pub fn deregister_device(&self, device: &DeviceId) {
        info!(device = %device, "deregistering device");
        self.devices.remove(device);
        self.cursors.reset_device(device);
        self.content_state.reset_device(device);
        self.folders.reset_device(device);
        self.continuations.reset_device(device);
        self.collection_locks.lock().retain(|(d, _), _| d != device);
    }

    /// Processes one sync request.
    ///
    /// Collections are handled independently: a failure in one yields a
    /// collection-scoped status and never prevents the others from
    /// returning a valid, advanced state.
    pub fn handle_sync(&self, request: &SyncRequest) -> SyncResponse {
        let collections = request
            .collections
            .iter()
            .map(|collection| self.sync_collection(&request.device_id, collection))
            .collect();

        SyncResponse { collections }
    }

    fn collection_lock(&self, device: &DeviceId, collection: &CollectionKey) -> Arc<Mutex<()>> {
        self.collection_locks
            .lock()
            .entry((device.clone(), collection.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn sync_collection(
        &self,
        device: &DeviceId,
        request: &CollectionSyncRequest,
    ) -> CollectionSyncResponse {
        let lock = self.collection_lock(device, &request.collection);
        let _serialized = lock.lock();

        // The folder registry is authoritative for the collection's
        // class; a missing entry or a mismatching class means the
        // catalog changed under the client.
        let folder = match self.folders.get(device, &request.collection) {
            Some(folder) => folder,
            None => {
                warn!(device = %device, collection = %request.collection, "collection not known for device");
                return CollectionSyncResponse::collection_unknown(
                    request.collection.clone(),
                    request.data_class,
                    request.cursor,
                );
            }
        };
        if folder.data_class != request.data_class {
            warn!(
                device = %device,
                collection = %request.collection,
                registered = %folder.data_class,
                requested = %request.data_class,
                "collection class changed under the client"
            );
            return CollectionSyncResponse::collection_unknown(
                request.collection.clone(),
                request.data_class,
                request.cursor,
            );
        }
        let class = folder.data_class;

        if request.cursor == 0 {
            // Start fresh: drop whatever state an earlier incarnation of
            // this collection left behind.
            debug!(device = %device, collection = %request.collection, "initial sync, purging stale state");
            self.cursors.reset(device, &request.collection);
            self.content_state.reset(device, class, &request.collection);
            self.continuations.remove(device, class);
        } else if !self.cursors.validate(device, &request.collection, request.cursor) {
            warn!(
                device = %device,
                collection = %request.collection,
                cursor = request.cursor,
                "invalid cursor, resetting collection state"
            );
            self.cursors.reset(device, &request.collection);
            self.content_state.reset(device, class, &request.collection);
            self.continuations.remove(device, class);
            return CollectionSyncResponse::invalid_cursor(request.collection.clone(), class);
        }

        let controller = match self.controllers.resolve(class) {
            Some(controller) => controller,
            None => {
                error!(class = %class, "no data controller registered");
                return CollectionSyncResponse::server_error(
                    request.collection.clone(),
                    class,
                    request.cursor,
                );
            }
        };

        match self.run_dialogue(device, class, request, controller.as_ref()) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    device = %device,
                    collection = %request.collection,
                    error = %err,
                    "collection dialogue failed, cursor left untouched"
                );
                CollectionSyncResponse::server_error(request.collection.clone(), class, request.cursor)
            }
        }
    }

    /// Runs the fallible part of one dialogue.
    ///
    /// Every data-controller call happens before the commit phase at the
    /// bottom; an error anywhere returns with cursor, ledger, and
    /// continuation untouched by the delta path, so an identical retry
    /// is safe.
    fn run_dialogue(
        &self,
        device: &DeviceId,
        class: DataClass,
        request: &CollectionSyncRequest,
        controller: &dyn DataController,
    ) -> EngineResult<CollectionSyncResponse> {
        let initial = request.cursor == 0;
        let window_limit = self.config.effective_window(request.window_size);
        // The cursor the client retries with while a window drains.
        let presented = if initial { 1 } else { request.cursor };

        let applier =
            ChangeApplier::new(controller, &self.content_state, device, class, &request.collection);
        let applied = applier.apply(request.cursor, &request.commands)?;

        // Everything the client just submitted is stamped at or before
        // this moment on the controller's clock; storing it as last-sync
        // keeps those mutations out of the next dialogue's change set.
        let mut snapshot = controller.current_timestamp();

        let (emitted, remainder) = if request.want_server_changes {
            let pending = match self
                .continuations
                .take(device, class, &request.collection, request.cursor)
            {
                Some(continuation) => {
                    debug!(
                        device = %device,
                        collection = %request.collection,
                        remaining = continuation.remainder.total(),
                        "draining continuation"
                    );
                    snapshot = continuation.snapshot;
                    let mut pending = continuation.remainder;
                    pending.normalize(&applied.forced);
                    pending
                }
                None => {
                    let since = if initial {
                        None
                    } else {
                        self.cursors.get(device, &request.collection).map(|c| c.last_sync)
                    };
                    compute_deltas(
                        controller,
                        &self.content_state,
                        device,
                        class,
                        &request.collection,
                        request.filter,
                        since,
                        &applied.echo,
                        &applied.forced,
                    )
                    .map_err(|err| self.read_failure(class, err))?
                }
            };
            let (window, remainder) = split_window(pending, window_limit);
            (window, remainder)
        } else {
            (DeltaSet::default(), None)
        };

        // One batched read resolves every emitted payload.
        let payload_ids: Vec<ItemId> = emitted
            .adds
            .iter()
            .chain(emitted.changes.iter())
            .cloned()
            .collect();
        let payloads = if payload_ids.is_empty() {
            BTreeMap::new()
        } else {
            controller
                .fetch_items(&payload_ids)
                .map_err(|err| self.read_failure(class, err))?
        };

        let fetch_responses =
            self.resolve_fetches(class, controller, &applied.fetch_ids)?;

        // ---- commit phase: infallible in-memory writes only ----

        let mut response =
            CollectionSyncResponse::success(request.collection.clone(), class, presented);
        response.add_responses = applied.add_responses;
        response.change_responses = applied.change_responses;
        response.delete_responses = applied.delete_responses;
        response.fetch_responses = fetch_responses;

        match remainder {
            Some(rest) => {
                // A windowed initial sync still moves to cursor 1; a
                // held cursor of 0 would purge the ledger on retry.
                if initial {
                    self.cursors.advance(device, &request.collection, 1, snapshot)?;
                }
                response.more_available = true;
                response.new_cursor = presented;
                self.continuations.store(
                    device,
                    class,
                    Continuation {
                        collection: request.collection.clone(),
                        cursor: presented,
                        remainder: rest,
                        snapshot,
                    },
                );
            }
            None => {
                self.continuations.remove(device, class);
                let fetch_only =
                    !initial && request.commands.mutation_count() == 0 && !request.want_server_changes;
                if fetch_only {
                    // Fetches do not participate in cursor progression.
                    response.new_cursor = request.cursor;
                } else {
                    let next = if initial { 1 } else { request.cursor + 1 };
                    self.cursors.advance(device, &request.collection, next, snapshot)?;
                    response.new_cursor = next;
                }
            }
        }

        for id in &emitted.adds {
            // Ledgered even when the payload vanished between listing
            // and fetch; the next dialogue then repairs it as a delete.
            self.content_state
                .mark_delivered(device, class, &request.collection, id.clone());
            match payloads.get(id) {
                Some(payload) => response.server_adds.push(ServerItem {
                    server_id: id.clone(),
                    payload: payload.clone(),
                }),
                None => {
                    warn!(collection = %request.collection, item = %id, "item vanished before emission")
                }
            }
        }
        for id in &emitted.changes {
            if let Some(payload) = payloads.get(id) {
                response.server_changes.push(ServerItem {
                    server_id: id.clone(),
                    payload: payload.clone(),
                });
            }
        }
        for id in &emitted.deletes {
            self.content_state
                .unmark(device, class, &request.collection, id);
            response.server_deletes.push(id.clone());
        }

        self.folders
            .update_filter(device, &request.collection, request.filter);

        info!(
            device = %device,
            collection = %request.collection,
            new_cursor = response.new_cursor,
            adds = response.server_adds.len(),
            changes = response.server_changes.len(),
            deletes = response.server_deletes.len(),
            more = response.more_available,
            "dialogue complete"
        );

        Ok(response)
    }

    fn resolve_fetches(
        &self,
        class: DataClass,
        controller: &dyn DataController,
        fetch_ids: &[ItemId],
    ) -> EngineResult<Vec<FetchResponse>> {
        if fetch_ids.is_empty() {
            return Ok(Vec::new());
        }

        let fetched: BTreeMap<ItemId, Payload> = controller
            .fetch_items(fetch_ids)
            .map_err(|err| self.read_failure(class, err))?;

        Ok(fetch_ids
            .iter()
            .map(|id| match fetched.get(id) {
                Some(payload) => FetchResponse {
                    server_id: id.clone(),
                    status: CommandStatus::Success,
                    payload: Some(payload.clone()),
                },
                None => FetchResponse {
                    server_id: id.clone(),
                    status: CommandStatus::NotFound,
                    payload: None,
                },
            })
            .collect())
    }

    /// Any controller failure on the read path aborts the collection
    /// dialogue; the caller maps it to a ServerError response with the
    /// cursor untouched.
    fn read_failure(&self, class: DataClass, err: ControllerError) -> EngineError {
        EngineError::ControllerUnavailable {
            class,
            message: err.to_string(),
        }
    }
}
