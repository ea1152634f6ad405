//! Change and notice payloads broadcast to presentational components

use serde::{Deserialize, Serialize};

/// Why an item in the store changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// Seeded from a feed page or a hydrate call
    Loaded,
    /// The viewer's own action, applied before the remote call
    Optimistic,
    /// A realtime event merged into the store
    Remote,
    /// An optimistic change rolled back after a failed mutation
    Reverted,
    /// Authoritative state from a recovery re-fetch
    Refetched,
    /// The item no longer exists
    Removed,
}

/// Emitted whenever the store changes; components re-read the item on receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    pub item_id: String,
    pub cause: ChangeCause,
}

impl StoreChange {
    pub fn new(item_id: impl Into<String>, cause: ChangeCause) -> Self {
        Self {
            item_id: item_id.into(),
            cause,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    ReactionReverted,
    SaveReverted,
    RefetchFailed,
}

/// Transient, non-blocking message for the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub item_id: String,
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(item_id: impl Into<String>, kind: NoticeKind) -> Self {
        let message = match kind {
            NoticeKind::ReactionReverted => "failed to update reaction, reverted",
            NoticeKind::SaveReverted => "failed to update save, reverted",
            NoticeKind::RefetchFailed => "could not refresh post, showing last known state",
        };
        Self {
            item_id: item_id.into(),
            kind,
            message: message.to_string(),
        }
    }
}
