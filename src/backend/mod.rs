//! Collaborator capabilities consumed by the reconciler
//!
//! The hosted backend provides two things: remote mutations against the
//! system of record, and realtime row-change subscriptions. Both are traits
//! so a view can run against the hosted service or [`MemoryBackend`].

mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{RawChange, ReactionKind, RemoteItem};

/// Remote mutation interface of the system of record.
///
/// Every write is idempotent: it names the state it wants, not a delta.
#[async_trait]
pub trait RemoteMutations: Send + Sync {
    /// Create or replace `viewer_id`'s reaction row for the item
    async fn upsert_reaction(
        &self,
        item_id: &str,
        viewer_id: &str,
        kind: ReactionKind,
    ) -> Result<()>;

    /// Delete `viewer_id`'s reaction row for the item, if any
    async fn delete_reaction(&self, item_id: &str, viewer_id: &str) -> Result<()>;

    /// Create (`saved = true`) or delete the viewer's save row
    async fn toggle_save(&self, item_id: &str, viewer_id: &str, saved: bool) -> Result<()>;

    /// Read the authoritative item as seen by `viewer_id`; `None` if it no longer exists
    async fn fetch_item(&self, item_id: &str, viewer_id: &str) -> Result<Option<RemoteItem>>;
}

/// Callback invoked for every row change on a subscribed table
pub type EventCallback = Arc<dyn Fn(RawChange) + Send + Sync>;

/// Realtime subscription interface.
///
/// Callbacks may be invoked from any thread; they must not block.
pub trait RealtimeSource: Send + Sync {
    fn subscribe(&self, table: &str, filter: &str, on_event: EventCallback) -> Result<Subscription>;
}

/// Handle returned by [`RealtimeSource::subscribe`].
///
/// Unsubscribes when [`unsubscribe`](Subscription::unsubscribe) is called or
/// the handle is dropped.
pub struct Subscription {
    table: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(table: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            table: table.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
