//! Request and response models for one sync dialogue.

use crate::command::{CommandBatch, CommandStatus};
use crate::types::{CollectionKey, DataClass, DeviceId, ItemId, Payload};
use serde::{Deserialize, Serialize};

/// Collection-level status of one sync dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionStatus {
    /// The dialogue completed.
    Success,
    /// The submitted cursor does not match the stored counter; the
    /// client must restart this collection from cursor 0.
    InvalidCursor,
    /// The dialogue failed server-side; the cursor was not advanced and
    /// an identical retry is safe.
    ServerError,
    /// The collection is not known for this device; the client must
    /// resynchronize its collection catalog.
    CollectionUnknown,
}

impl CollectionStatus {
    /// Converts to the stable numeric wire code.
    pub fn to_code(&self) -> u8 {
        match self {
            CollectionStatus::Success => 1,
            CollectionStatus::InvalidCursor => 3,
            CollectionStatus::ServerError => 5,
            CollectionStatus::CollectionUnknown => 12,
        }
    }

    /// Converts from a numeric wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CollectionStatus::Success),
            3 => Some(CollectionStatus::InvalidCursor),
            5 => Some(CollectionStatus::ServerError),
            12 => Some(CollectionStatus::CollectionUnknown),
            _ => None,
        }
    }
}

/// One collection's slice of a sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSyncRequest {
    /// Scope key of the collection.
    pub collection: CollectionKey,
    /// Data class the client believes the collection belongs to.
    pub data_class: DataClass,
    /// The client's cursor; 0 means "initial sync, no prior state".
    pub cursor: u64,
    /// Maximum number of server-side items in the response; 0 selects
    /// the engine default.
    pub window_size: u32,
    /// Whether the client wants server-side changes in the response.
    pub want_server_changes: bool,
    /// Opaque filter parameter passed through to the data controller.
    pub filter: u32,
    /// Client-submitted commands for this collection.
    pub commands: CommandBatch,
}

impl CollectionSyncRequest {
    /// Creates a request slice with no commands and default options.
    pub fn new(collection: impl Into<CollectionKey>, data_class: DataClass, cursor: u64) -> Self {
        Self {
            collection: collection.into(),
            data_class,
            cursor,
            window_size: 0,
            want_server_changes: true,
            filter: 0,
            commands: CommandBatch::default(),
        }
    }

    /// Sets the window size.
    pub fn with_window_size(mut self, size: u32) -> Self {
        self.window_size = size;
        self
    }

    /// Sets whether server changes are wanted.
    pub fn with_server_changes(mut self, wanted: bool) -> Self {
        self.want_server_changes = wanted;
        self
    }

    /// Sets the filter parameter.
    pub fn with_filter(mut self, filter: u32) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the command batch.
    pub fn with_commands(mut self, commands: CommandBatch) -> Self {
        self.commands = commands;
        self
    }
}

/// A full sync request: one device, one or more collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// The requesting device.
    pub device_id: DeviceId,
    /// Per-collection request slices, processed independently.
    pub collections: Vec<CollectionSyncRequest>,
}

impl SyncRequest {
    /// Creates a request for a single collection.
    pub fn single(device_id: impl Into<DeviceId>, collection: CollectionSyncRequest) -> Self {
        Self {
            device_id: device_id.into(),
            collections: vec![collection],
        }
    }
}

/// Outcome of one client add command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddResponse {
    /// The client-local reference from the command.
    pub client_ref: String,
    /// The assigned server id on success.
    pub server_id: Option<ItemId>,
    /// Per-item outcome.
    pub status: CommandStatus,
}

/// Outcome of one client change command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResponse {
    /// Server id from the command.
    pub server_id: ItemId,
    /// Per-item outcome.
    pub status: CommandStatus,
}

/// Outcome of one client delete command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Server id from the command.
    pub server_id: ItemId,
    /// Per-item outcome.
    pub status: CommandStatus,
}

/// Outcome of one client fetch command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Server id from the command.
    pub server_id: ItemId,
    /// Per-item outcome.
    pub status: CommandStatus,
    /// The full item body on success.
    pub payload: Option<Payload>,
}

/// A server-side item sent client-ward as an add or a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerItem {
    /// Server id of the item.
    pub server_id: ItemId,
    /// The item body.
    pub payload: Payload,
}

/// One collection's slice of a sync response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSyncResponse {
    /// Scope key of the collection.
    pub collection: CollectionKey,
    /// Data class of the collection.
    pub data_class: DataClass,
    /// Collection-level status.
    pub status: CollectionStatus,
    /// The cursor the client must present next.
    pub new_cursor: u64,
    /// True when a windowed delta has an unsent remainder; the client
    /// repeats the request with the same cursor to drain it.
    pub more_available: bool,
    /// Outcomes for client add commands.
    pub add_responses: Vec<AddResponse>,
    /// Outcomes for client change commands.
    pub change_responses: Vec<ChangeResponse>,
    /// Outcomes for client delete commands.
    pub delete_responses: Vec<DeleteResponse>,
    /// Outcomes for client fetch commands.
    pub fetch_responses: Vec<FetchResponse>,
    /// Server-side items new to this client.
    pub server_adds: Vec<ServerItem>,
    /// Server-side items changed since the client's last sync.
    pub server_changes: Vec<ServerItem>,
    /// Server ids deleted since the client's last sync.
    pub server_deletes: Vec<ItemId>,
}

impl CollectionSyncResponse {
    /// Creates an empty success response at the given cursor.
    pub fn success(collection: CollectionKey, data_class: DataClass, new_cursor: u64) -> Self {
        Self {
            collection,
            data_class,
            status: CollectionStatus::Success,
            new_cursor,
            more_available: false,
            add_responses: Vec::new(),
            change_responses: Vec::new(),
            delete_responses: Vec::new(),
            fetch_responses: Vec::new(),
            server_adds: Vec::new(),
            server_changes: Vec::new(),
            server_deletes: Vec::new(),
        }
    }

    /// Creates the invalid-cursor response: the client must restart the
    /// collection from cursor 0.
    pub fn invalid_cursor(collection: CollectionKey, data_class: DataClass) -> Self {
        let mut response = Self::success(collection, data_class, 0);
        response.status = CollectionStatus::InvalidCursor;
        response
    }

    /// Creates the collection-unknown response; the submitted cursor is
    /// echoed untouched.
    pub fn collection_unknown(collection: CollectionKey, data_class: DataClass, cursor: u64) -> Self {
        let mut response = Self::success(collection, data_class, cursor);
        response.status = CollectionStatus::CollectionUnknown;
        response
    }

    /// Creates the server-error response; the submitted cursor is echoed
    /// so an identical retry stays valid.
    pub fn server_error(collection: CollectionKey, data_class: DataClass, cursor: u64) -> Self {
        let mut response = Self::success(collection, data_class, cursor);
        response.status = CollectionStatus::ServerError;
        response
    }

    /// Total number of server-side items carried client-ward.
    pub fn delta_len(&self) -> usize {
        self.server_adds.len() + self.server_changes.len() + self.server_deletes.len()
    }
}

/// A full sync response, one slice per requested collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Per-collection response slices, in request order.
    pub collections: Vec<CollectionSyncResponse>,
}

impl SyncResponse {
    /// Finds the response slice for a collection key.
    pub fn collection(&self, key: &CollectionKey) -> Option<&CollectionSyncResponse> {
        self.collections.iter().find(|c| &c.collection == key)
    }
}
