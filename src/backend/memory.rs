//! In-memory system of record
//!
//! Implements both collaborator traits over plain maps. Mutations emit the
//! same row-change payloads the hosted realtime transport would, so a view
//! wired to this backend sees its own echoes. Failure injection and echo
//! control make the interleavings of the reconciler reproducible in tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{EventCallback, RealtimeSource, RemoteMutations, Subscription};
use crate::config::TableConfig;
use crate::error::{EngagementError, Result};
use crate::model::{RawChange, ReactionKind, RemoteItem};

#[derive(Debug, Default)]
struct ServerState {
    posts: BTreeSet<String>,
    /// (post, user) -> kind
    reactions: HashMap<(String, String), ReactionKind>,
    /// (post, user)
    saves: HashSet<(String, String)>,
}

struct Subscriber {
    table: String,
    filter: String,
    callback: EventCallback,
}

type Subscribers = Arc<Mutex<HashMap<u64, Subscriber>>>;

pub struct MemoryBackend {
    tables: TableConfig,
    state: Mutex<ServerState>,
    subscribers: Subscribers,
    next_subscriber: AtomicU64,
    /// Number of upcoming mutations that fail before touching state
    failing_mutations: AtomicUsize,
    failing_fetches: AtomicBool,
    echo: AtomicBool,
    /// Logical clock in milliseconds, strictly increasing per read
    clock: AtomicI64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_tables(TableConfig::default())
    }

    pub fn with_tables(tables: TableConfig) -> Self {
        Self {
            tables,
            state: Mutex::new(ServerState::default()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(1),
            failing_mutations: AtomicUsize::new(0),
            failing_fetches: AtomicBool::new(false),
            echo: AtomicBool::new(true),
            clock: AtomicI64::new(0),
        }
    }

    pub fn with_post(self, id: &str) -> Self {
        self.insert_post(id);
        self
    }

    pub fn insert_post(&self, id: &str) {
        self.state().posts.insert(id.to_string());
    }

    /// Delete a post and its rows, emitting the post delete
    pub fn delete_post(&self, id: &str) {
        let existed = {
            let mut state = self.state();
            state.reactions.retain(|(post, _), _| post != id);
            state.saves.retain(|(post, _)| post != id);
            state.posts.remove(id)
        };
        if existed {
            let old = row([(self.tables.post_id_column.as_str(), id)]);
            let change = self.change(&self.tables.posts, "DELETE", JsonValue::Null, old);
            self.emit(change);
        }
    }

    /// Write a reaction row without emitting anything
    pub fn seed_reaction(&self, item_id: &str, viewer_id: &str, kind: ReactionKind) {
        let mut state = self.state();
        state.posts.insert(item_id.to_string());
        state.reactions.insert((item_id.to_string(), viewer_id.to_string()), kind);
    }

    /// Write a save row without emitting anything
    pub fn seed_save(&self, item_id: &str, viewer_id: &str) {
        let mut state = self.state();
        state.posts.insert(item_id.to_string());
        state.saves.insert((item_id.to_string(), viewer_id.to_string()));
    }

    /// Make the next `n` mutations fail with a network error
    pub fn fail_next_mutations(&self, n: usize) {
        self.failing_mutations.store(n, Ordering::SeqCst);
    }

    pub fn set_fetch_failing(&self, failing: bool) {
        self.failing_fetches.store(failing, Ordering::SeqCst);
    }

    /// Whether mutations emit realtime changes (on by default)
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    pub fn reaction_of(&self, item_id: &str, viewer_id: &str) -> Option<ReactionKind> {
        self.state()
            .reactions
            .get(&(item_id.to_string(), viewer_id.to_string()))
            .copied()
    }

    pub fn reaction_count(&self, item_id: &str, kind: ReactionKind) -> u32 {
        self.counts(&self.state(), item_id).get(&kind).copied().unwrap_or(0)
    }

    pub fn is_saved(&self, item_id: &str, viewer_id: &str) -> bool {
        self.state()
            .saves
            .contains(&(item_id.to_string(), viewer_id.to_string()))
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Next server timestamp
    pub fn now(&self) -> DateTime<Utc> {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        base_time() + Duration::milliseconds(tick)
    }

    /// Deliver a change to every matching subscriber
    pub fn emit(&self, change: RawChange) {
        let targets: Vec<EventCallback> = lock(&self.subscribers)
            .values()
            .filter(|sub| sub.table == change.table && matches_filter(&sub.filter, &change))
            .map(|sub| sub.callback.clone())
            .collect();

        debug!(
            table = %change.table,
            event = %change.event_type,
            subscribers = targets.len(),
            "Emitting change"
        );

        for callback in targets {
            callback(change.clone());
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        lock(&self.state)
    }

    fn counts(&self, state: &ServerState, item_id: &str) -> BTreeMap<ReactionKind, u32> {
        let mut counts = BTreeMap::new();
        for ((post, _), kind) in &state.reactions {
            if post == item_id {
                *counts.entry(*kind).or_insert(0) += 1;
            }
        }
        counts
    }

    fn check_mutation(&self) -> Result<()> {
        let injected = self
            .failing_mutations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(EngagementError::Network("injected failure".to_string()));
        }
        Ok(())
    }

    fn ensure_post(&self, state: &ServerState, item_id: &str) -> Result<()> {
        if state.posts.contains(item_id) {
            Ok(())
        } else {
            Err(EngagementError::NotFound(item_id.to_string()))
        }
    }

    fn change(&self, table: &str, event_type: &str, new: JsonValue, old: JsonValue) -> RawChange {
        RawChange {
            table: table.to_string(),
            event_type: event_type.to_string(),
            new,
            old,
            commit_timestamp: Some(self.now()),
        }
    }

    fn reaction_row(&self, item_id: &str, viewer_id: &str, kind: ReactionKind) -> JsonValue {
        row([
            (self.tables.item_column.as_str(), item_id),
            (self.tables.viewer_column.as_str(), viewer_id),
            (self.tables.kind_column.as_str(), kind.as_str()),
        ])
    }

    fn echo_change(&self, change: Option<RawChange>) {
        if let Some(change) = change {
            if self.echo.load(Ordering::SeqCst) {
                self.emit(change);
            }
        }
    }
}

#[async_trait]
impl RemoteMutations for MemoryBackend {
    async fn upsert_reaction(
        &self,
        item_id: &str,
        viewer_id: &str,
        kind: ReactionKind,
    ) -> Result<()> {
        self.check_mutation()?;
        let change = {
            let mut state = self.state();
            self.ensure_post(&state, item_id)?;
            let previous = state
                .reactions
                .insert((item_id.to_string(), viewer_id.to_string()), kind);
            let new = self.reaction_row(item_id, viewer_id, kind);
            match previous {
                None => Some(self.change(&self.tables.reactions, "INSERT", new, JsonValue::Null)),
                Some(old) if old != kind => {
                    let old = self.reaction_row(item_id, viewer_id, old);
                    Some(self.change(&self.tables.reactions, "UPDATE", new, old))
                }
                Some(_) => None,
            }
        };
        self.echo_change(change);
        Ok(())
    }

    async fn delete_reaction(&self, item_id: &str, viewer_id: &str) -> Result<()> {
        self.check_mutation()?;
        let change = {
            let mut state = self.state();
            self.ensure_post(&state, item_id)?;
            state
                .reactions
                .remove(&(item_id.to_string(), viewer_id.to_string()))
                .map(|old| {
                    let old = self.reaction_row(item_id, viewer_id, old);
                    self.change(&self.tables.reactions, "DELETE", JsonValue::Null, old)
                })
        };
        self.echo_change(change);
        Ok(())
    }

    async fn toggle_save(&self, item_id: &str, viewer_id: &str, saved: bool) -> Result<()> {
        self.check_mutation()?;
        let change = {
            let mut state = self.state();
            self.ensure_post(&state, item_id)?;
            let key = (item_id.to_string(), viewer_id.to_string());
            let save_row = row([
                (self.tables.item_column.as_str(), item_id),
                (self.tables.viewer_column.as_str(), viewer_id),
            ]);
            if saved && state.saves.insert(key.clone()) {
                Some(self.change(&self.tables.saves, "INSERT", save_row, JsonValue::Null))
            } else if !saved && state.saves.remove(&key) {
                Some(self.change(&self.tables.saves, "DELETE", JsonValue::Null, save_row))
            } else {
                None
            }
        };
        self.echo_change(change);
        Ok(())
    }

    async fn fetch_item(&self, item_id: &str, viewer_id: &str) -> Result<Option<RemoteItem>> {
        if self.failing_fetches.load(Ordering::SeqCst) {
            return Err(EngagementError::Network("injected fetch failure".to_string()));
        }

        let state = self.state();
        if !state.posts.contains(item_id) {
            return Ok(None);
        }

        let key = (item_id.to_string(), viewer_id.to_string());
        let counts: Map<String, JsonValue> = self
            .counts(&state, item_id)
            .into_iter()
            .map(|(kind, count)| (kind.as_str().to_string(), JsonValue::from(count)))
            .collect();

        Ok(Some(RemoteItem {
            id: item_id.to_string(),
            reactions: JsonValue::Object(counts),
            viewer_reaction: state.reactions.get(&key).map(|kind| kind.as_str().to_string()),
            is_saved: state.saves.contains(&key),
            version: Some(self.now()),
        }))
    }
}

impl RealtimeSource for MemoryBackend {
    fn subscribe(
        &self,
        table: &str,
        filter: &str,
        on_event: EventCallback,
    ) -> Result<Subscription> {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscribers).insert(
            id,
            Subscriber {
                table: table.to_string(),
                filter: filter.to_string(),
                callback: on_event,
            },
        );

        let subscribers = Arc::downgrade(&self.subscribers);
        Ok(Subscription::new(table, move || {
            if let Some(subscribers) = subscribers.upgrade() {
                lock(&subscribers).remove(&id);
            }
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_default()
}

fn row<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> JsonValue {
    JsonValue::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), JsonValue::from(v)))
            .collect(),
    )
}

/// `*` matches everything; `column=eq.value` matches rows (new or old) with that value.
fn matches_filter(filter: &str, change: &RawChange) -> bool {
    let Some((column, value)) = filter.split_once("=eq.") else {
        return true;
    };
    [&change.new, &change.old]
        .iter()
        .any(|row| row.get(column).and_then(JsonValue::as_str) == Some(value))
}
