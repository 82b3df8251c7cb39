//! Client-submitted commands and per-item outcome codes.

use crate::types::{ItemId, Payload};
use serde::{Deserialize, Serialize};

/// Outcome of a single client command.
///
/// A command's failure is always reported per item; it never aborts the
/// rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// The command was applied.
    Success,
    /// The server failed to apply the command.
    ServerError,
    /// The server denied the mutation; the authoritative copy will be
    /// re-sent in a following delta.
    Conflict,
    /// The referenced item no longer exists on the server.
    NotFound,
}

impl CommandStatus {
    /// Converts to the stable numeric wire code.
    pub fn to_code(&self) -> u8 {
        match self {
            CommandStatus::Success => 1,
            CommandStatus::ServerError => 5,
            CommandStatus::Conflict => 7,
            CommandStatus::NotFound => 8,
        }
    }

    /// Converts from a numeric wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CommandStatus::Success),
            5 => Some(CommandStatus::ServerError),
            7 => Some(CommandStatus::Conflict),
            8 => Some(CommandStatus::NotFound),
            _ => None,
        }
    }
}

/// Client request to create a new server item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddCommand {
    /// Client-local reference echoed back in the outcome so the client
    /// can map its temporary id to the assigned server id.
    pub client_ref: String,
    /// The item body.
    pub payload: Payload,
}

/// Client request to update an existing server item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeCommand {
    /// Server id of the item to update.
    pub server_id: ItemId,
    /// The new item body.
    pub payload: Payload,
}

/// Client request to delete a server item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteCommand {
    /// Server id of the item to delete.
    pub server_id: ItemId,
}

/// Client request to read one item with its full body.
///
/// Fetches never mutate state and do not participate in cursor
/// progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchCommand {
    /// Server id of the item to fetch.
    pub server_id: ItemId,
}

/// The batch of commands a client submits for one collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Items to create.
    pub adds: Vec<AddCommand>,
    /// Items to update.
    pub changes: Vec<ChangeCommand>,
    /// Items to delete.
    pub deletes: Vec<DeleteCommand>,
    /// Items to read back with full payload.
    pub fetches: Vec<FetchCommand>,
}

impl CommandBatch {
    /// Returns true if the batch carries no commands at all.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.changes.is_empty()
            && self.deletes.is_empty()
            && self.fetches.is_empty()
    }

    /// Number of mutating commands (fetches excluded).
    pub fn mutation_count(&self) -> usize {
        self.adds.len() + self.changes.len() + self.deletes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        for status in [
            CommandStatus::Success,
            CommandStatus::ServerError,
            CommandStatus::Conflict,
            CommandStatus::NotFound,
        ] {
            assert_eq!(CommandStatus::from_code(status.to_code()), Some(status));
        }
        assert_eq!(CommandStatus::from_code(0), None);
    }

    #[test]
    fn empty_batch() {
        let batch = CommandBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.mutation_count(), 0);
    }

    #[test]
    fn mutation_count_excludes_fetches() {
        let batch = CommandBatch {
            adds: vec![AddCommand {
                client_ref: "r1".into(),
                payload: vec![1],
            }],
            changes: vec![],
            deletes: vec![DeleteCommand {
                server_id: ItemId::from("a"),
            }],
            fetches: vec![FetchCommand {
                server_id: ItemId::from("b"),
            }],
        };
        assert!(!batch.is_empty());
        assert_eq!(batch.mutation_count(), 2);
    }
}
