//! Optimistic reaction/save reconciler
//!
//! One [`Reconciler`] is bound to one rendered view (a feed, a profile, a
//! post page). It owns that view's entity store and in-flight operations and
//! discards them when dropped.
//!
//! ```text
//!   react / toggle_save ──▶ mutator ──(sync)──▶ EntityStore ──▶ StoreChange
//!                              │                    ▲
//!                              └─(task)─▶ backend   │
//!                                    │ err          │
//!                                    ▼              │
//!                                 recovery ─────────┤ revert + re-fetch
//!   realtime ──▶ listener ──────────────────────────┘ merge
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use campuzbuzz_engagement::{Reconciler, ReconcilerConfig, ReactionKind};
//!
//! let mut view = Reconciler::new("viewer-1", backend.clone(), ReconcilerConfig::default())?;
//! view.load(feed_page);
//! view.attach(backend.as_ref())?;
//!
//! // Reflected immediately; the remote write runs in the background
//! view.react("p1", ReactionKind::Like);
//! let item = view.get_item("p1");
//! ```

mod listener;
mod mutator;
mod recovery;

pub use listener::Disposition;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::{EventCallback, RealtimeSource, RemoteMutations, Subscription};
use crate::config::ReconcilerConfig;
use crate::error::{EngagementError, Result};
use crate::model::{ChangeEvent, ContentItem, RawChange, ReactionKind, RemoteItem};
use crate::notify::{ChangeCause, Notice, StoreChange};
use crate::store::{EntityStore, PendingIntent, PendingSlot, PendingTable};

/// Everything a view knows locally
#[derive(Debug, Default)]
pub(crate) struct ViewState {
    pub store: EntityStore,
    pub pending: PendingTable,
    /// Items with a background re-fetch running; `true` queues one more pass
    pub refetches: HashMap<String, bool>,
}

/// State shared between the view handle, its background tasks, and its
/// realtime callbacks
pub(crate) struct Shared {
    viewer_id: String,
    backend: Arc<dyn RemoteMutations>,
    config: ReconcilerConfig,
    runtime: Handle,
    state: Mutex<ViewState>,
    changes: broadcast::Sender<StoreChange>,
    notices: broadcast::Sender<Notice>,
}

impl Shared {
    /// Never held across an `.await`
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, item_id: &str, cause: ChangeCause) {
        // No receivers is fine
        let _ = self.changes.send(StoreChange::new(item_id, cause));
    }

    fn notice(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn ingest(self: &Arc<Self>, raw: RawChange) -> Option<Disposition> {
        match ChangeEvent::normalize(&raw, &self.config.tables) {
            Ok(event) => Some(self.apply_event(&event)),
            Err(err) => {
                warn!(
                    table = %raw.table,
                    event = %raw.event_type,
                    error = %err,
                    "Dropping malformed realtime change"
                );
                None
            }
        }
    }

    fn apply_event(self: &Arc<Self>, event: &ChangeEvent) -> Disposition {
        let disposition = listener::apply(&mut self.lock(), &self.viewer_id, event);
        let id = event.content_item_id.as_str();

        match disposition {
            Disposition::Foreign | Disposition::Direct => self.notify(id, ChangeCause::Remote),
            Disposition::Removed => self.notify(id, ChangeCause::Removed),
            Disposition::NeedsRefetch => recovery::schedule_refetch(self, id),
            _ => {}
        }
        disposition
    }
}

/// Result of an optimistic operation's remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The backend accepted the write; local state already matched
    Confirmed,
    /// A newer action replaced this one before it resolved; its result was ignored
    Superseded,
    /// The write failed; the change was rolled back and the item re-fetched
    Reverted,
    /// The background task did not run to completion
    Abandoned,
}

/// Handle to the background half of an optimistic operation
#[derive(Debug)]
pub struct MutationHandle {
    item_id: String,
    intent: PendingIntent,
    task: JoinHandle<MutationOutcome>,
}

impl MutationHandle {
    fn new(item_id: &str, intent: PendingIntent, task: JoinHandle<MutationOutcome>) -> Self {
        Self {
            item_id: item_id.to_string(),
            intent,
            task,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    /// The state the operation asked for
    pub fn intent(&self) -> PendingIntent {
        self.intent
    }

    /// Wait for the remote call (and any recovery) to finish
    pub async fn outcome(self) -> MutationOutcome {
        self.task.await.unwrap_or(MutationOutcome::Abandoned)
    }
}

/// Optimistic reconciler for one view
pub struct Reconciler {
    shared: Arc<Shared>,
    subscriptions: Vec<Subscription>,
}

impl Reconciler {
    /// Create a reconciler for `viewer_id`.
    ///
    /// Must be called inside a Tokio runtime; remote calls and re-fetches are
    /// spawned onto it.
    pub fn new(
        viewer_id: impl Into<String>,
        backend: Arc<dyn RemoteMutations>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            EngagementError::Config(format!("reconciler needs a Tokio runtime: {}", e))
        })?;

        let (changes, _) = broadcast::channel(config.change_channel_capacity.max(1));
        let (notices, _) = broadcast::channel(config.notice_channel_capacity.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                viewer_id: viewer_id.into(),
                backend,
                config,
                runtime,
                state: Mutex::new(ViewState::default()),
                changes,
                notices,
            }),
            subscriptions: Vec::new(),
        })
    }

    pub fn viewer_id(&self) -> &str {
        &self.shared.viewer_id
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.shared.config
    }

    /// Current local state of an item
    pub fn get_item(&self, id: &str) -> Option<ContentItem> {
        self.shared.lock().store.get(id).cloned()
    }

    /// Ids of every item in this view
    pub fn item_ids(&self) -> Vec<String> {
        self.shared.lock().store.ids().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().store.is_empty()
    }

    /// Seed the view from a page of fetched items.
    ///
    /// Items that fail validation are skipped. Returns how many were loaded.
    pub fn load(&self, items: impl IntoIterator<Item = RemoteItem>) -> usize {
        let mut loaded = Vec::new();
        {
            let mut state = self.shared.lock();
            for remote in items {
                let id = remote.id.clone();
                match ContentItem::try_from(remote) {
                    Ok(item) => {
                        if recovery::install(&mut state, item) {
                            loaded.push(id);
                        }
                    }
                    Err(err) => warn!(item_id = %id, error = %err, "Skipping malformed item"),
                }
            }
        }

        for id in &loaded {
            self.shared.notify(id, ChangeCause::Loaded);
        }
        info!(viewer = %self.shared.viewer_id, count = loaded.len(), "Loaded items into view");
        loaded.len()
    }

    /// Fetch one item from the system of record and install it.
    ///
    /// `Ok(None)` when the item no longer exists (it is dropped from the view).
    pub async fn hydrate(&self, id: &str) -> Result<Option<ContentItem>> {
        let fetched = recovery::fetch(&self.shared, id).await?;

        let (result, removed) = {
            let mut state = self.shared.lock();
            match fetched {
                Some(item) => {
                    recovery::install(&mut state, item);
                    (state.store.get(id).cloned(), false)
                }
                None => {
                    state.pending.forget(id);
                    (None, state.store.remove(id).is_some())
                }
            }
        };

        if result.is_some() {
            self.shared.notify(id, ChangeCause::Loaded);
        } else if removed {
            self.shared.notify(id, ChangeCause::Removed);
        }
        Ok(result)
    }

    /// React with `kind`, or withdraw it if it is already the viewer's reaction.
    ///
    /// The store reflects the change before this returns. `None` when the
    /// item is not in this view.
    pub fn react(&self, id: &str, kind: ReactionKind) -> Option<MutationHandle> {
        mutator::begin(&self.shared, id, |item| mutator::plan_reaction(item, kind))
    }

    /// Flip the viewer's save flag. Same contract as [`react`](Self::react).
    pub fn toggle_save(&self, id: &str) -> Option<MutationHandle> {
        mutator::begin(&self.shared, id, mutator::plan_save)
    }

    /// Subscribe to the reaction, save, and post tables
    pub fn attach(&mut self, source: &dyn RealtimeSource) -> Result<()> {
        if !self.subscriptions.is_empty() {
            return Ok(());
        }

        let config = &self.shared.config;
        let mut subscriptions = Vec::with_capacity(3);

        for table in config.tables.all() {
            let shared = Arc::downgrade(&self.shared);
            let on_event: EventCallback = Arc::new(move |raw: RawChange| {
                if let Some(shared) = shared.upgrade() {
                    shared.ingest(raw);
                }
            });
            let filter = config.filter_for(table);
            // Dropping the partial list unsubscribes what was already attached
            subscriptions.push(source.subscribe(table, &filter, on_event)?);
        }

        info!(
            viewer = %self.shared.viewer_id,
            tables = ?config.tables.all(),
            filter = config.filter(),
            "Attached realtime subscriptions"
        );
        self.subscriptions = subscriptions;
        Ok(())
    }

    /// Drop all realtime subscriptions
    pub fn detach(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        info!(viewer = %self.shared.viewer_id, "Detached realtime subscriptions");
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Feed a realtime change delivered outside [`attach`](Self::attach).
    ///
    /// `None` when the payload was malformed and dropped.
    pub fn ingest(&self, raw: RawChange) -> Option<Disposition> {
        self.shared.ingest(raw)
    }

    /// Merge an already-validated event
    pub fn apply_event(&self, event: &ChangeEvent) -> Disposition {
        self.shared.apply_event(event)
    }

    /// Stream of store changes for re-rendering
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.shared.changes.subscribe()
    }

    /// Stream of transient notices (reverted actions, failed refreshes)
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_pending(&self, id: &str, slot: PendingSlot) -> bool {
        self.shared.lock().pending.is_pending(id, slot)
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.detach();
    }
}
