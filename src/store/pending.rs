//! In-flight optimistic operations
//!
//! One operation per item per slot. Recording a new operation replaces the
//! previous one (last-write-wins); a replaced operation's resolution is
//! recognised by its token and ignored.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::{ContentItem, ReactionKind};

/// Which part of an item an operation owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingSlot {
    Reaction,
    Save,
}

/// The absolute state an operation asks the backend for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingIntent {
    /// `Some(kind)` upserts the viewer's reaction row, `None` deletes it
    Reaction(Option<ReactionKind>),
    Save(bool),
}

impl PendingIntent {
    pub fn slot(&self) -> PendingSlot {
        match self {
            PendingIntent::Reaction(_) => PendingSlot::Reaction,
            PendingIntent::Save(_) => PendingSlot::Save,
        }
    }

    /// Apply the intent to an item in place
    pub fn apply_to(&self, item: &mut ContentItem) {
        match *self {
            PendingIntent::Reaction(target) => {
                item.reactions.set_viewer_reaction(target);
            }
            PendingIntent::Save(saved) => item.is_saved = saved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Identifies this operation among replacements for the same slot
    pub token: u64,
    pub content_item_id: String,
    pub intent: PendingIntent,
    /// Item as it was before the optimistic change
    pub previous_state: ContentItem,
    pub submitted_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn slot(&self) -> PendingSlot {
        self.intent.slot()
    }

    /// Restore the fields this operation owns from its snapshot
    pub fn revert(&self, item: &mut ContentItem) {
        match self.slot() {
            PendingSlot::Reaction => item.reactions = self.previous_state.reactions.clone(),
            PendingSlot::Save => item.is_saved = self.previous_state.is_saved,
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingTable {
    next_token: u64,
    ops: HashMap<(String, PendingSlot), PendingOperation>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new operation, returning its token and the one it replaced
    pub fn record(
        &mut self,
        content_item_id: &str,
        intent: PendingIntent,
        previous_state: ContentItem,
    ) -> (u64, Option<PendingOperation>) {
        self.next_token += 1;
        let token = self.next_token;
        let op = PendingOperation {
            token,
            content_item_id: content_item_id.to_string(),
            intent,
            previous_state,
            submitted_at: Utc::now(),
        };
        let replaced = self.ops.insert((content_item_id.to_string(), intent.slot()), op);
        (token, replaced)
    }

    pub fn current(&self, content_item_id: &str, slot: PendingSlot) -> Option<&PendingOperation> {
        self.ops.get(&(content_item_id.to_string(), slot))
    }

    pub(crate) fn current_mut(
        &mut self,
        content_item_id: &str,
        slot: PendingSlot,
    ) -> Option<&mut PendingOperation> {
        self.ops.get_mut(&(content_item_id.to_string(), slot))
    }

    /// Remove the operation if `token` is still the current one for the slot
    pub fn resolve(
        &mut self,
        content_item_id: &str,
        slot: PendingSlot,
        token: u64,
    ) -> Option<PendingOperation> {
        let key = (content_item_id.to_string(), slot);
        match self.ops.get(&key) {
            Some(op) if op.token == token => self.ops.remove(&key),
            _ => None,
        }
    }

    pub fn is_pending(&self, content_item_id: &str, slot: PendingSlot) -> bool {
        self.current(content_item_id, slot).is_some()
    }

    /// Drop every operation for an item that no longer exists
    pub fn forget(&mut self, content_item_id: &str) {
        self.ops.retain(|(id, _), _| id != content_item_id);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
