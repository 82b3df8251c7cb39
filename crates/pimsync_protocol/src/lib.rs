//! # Pimsync Protocol
//!
//! Data model for the pimsync device synchronization dialogue.
//!
//! This crate provides:
//! - `DataClass` and the identifier newtypes (`DeviceId`, `CollectionKey`, `ItemId`)
//! - Client command batches (`CommandBatch`: add/change/delete/fetch)
//! - Per-item outcome records and status codes
//! - Collection-scoped request and response models
//!
//! This is a pure data-model crate with no I/O operations. Wire framing
//! (XML/WBXML or otherwise) is the transport's concern; every model here
//! derives `serde` traits so any encoding can be layered on top.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod messages;
mod types;

pub use command::{
    AddCommand, ChangeCommand, CommandBatch, CommandStatus, DeleteCommand, FetchCommand,
};
pub use messages::{
    AddResponse, ChangeResponse, CollectionStatus, CollectionSyncRequest, CollectionSyncResponse,
    DeleteResponse, FetchResponse, ServerItem, SyncRequest, SyncResponse,
};
pub use types::{CollectionKey, DataClass, DeviceId, ItemId, Payload, Timestamp};
