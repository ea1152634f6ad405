//! Retry/recovery controller
//!
//! A failed mutation is rolled back locally, reported as a notice, and
//! followed by exactly one re-fetch of the item. Nothing here is retried
//! further; the viewer tapping again is the retry.

use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use super::{Shared, ViewState};
use crate::error::{EngagementError, Result};
use crate::model::ContentItem;
use crate::notify::{ChangeCause, Notice, NoticeKind};
use crate::store::{PendingOperation, PendingSlot};

pub(crate) async fn on_mutation_failure(
    shared: Arc<Shared>,
    op: PendingOperation,
    err: EngagementError,
) {
    revert(&shared, &op, &err);

    let delay = shared.config.refetch_delay();
    if !delay.is_zero() {
        sleep(delay).await;
    }

    refetch(&shared, &op.content_item_id).await;
}

/// Restore the fields owned by `op` and tell the viewer
fn revert(shared: &Shared, op: &PendingOperation, err: &EngagementError) {
    let id = op.content_item_id.as_str();
    let reverted = match shared.lock().store.get_mut(id) {
        Some(item) => {
            op.revert(item);
            true
        }
        None => false,
    };

    if err.is_transient() {
        warn!(item_id = id, intent = ?op.intent, error = %err, "Reverted optimistic change");
    } else {
        error!(item_id = id, intent = ?op.intent, error = %err, "Remote rejected change, reverted");
    }

    if reverted {
        shared.notify(id, ChangeCause::Reverted);
    }

    let kind = match op.slot() {
        PendingSlot::Reaction => NoticeKind::ReactionReverted,
        PendingSlot::Save => NoticeKind::SaveReverted,
    };
    shared.notice(Notice::new(id, kind));
}

/// Re-fetch an item in the background.
///
/// At most one re-fetch runs per item. A request arriving while one is in
/// flight queues a single further pass, so a change committed after the
/// running read is still picked up.
pub(crate) fn schedule_refetch(shared: &Arc<Shared>, item_id: &str) {
    {
        let mut state = shared.lock();
        if let Some(queued) = state.refetches.get_mut(item_id) {
            *queued = true;
            debug!(item_id, "Re-fetch already running, queued another pass");
            return;
        }
        state.refetches.insert(item_id.to_string(), false);
    }

    let task_shared = shared.clone();
    let item_id = item_id.to_string();
    shared.runtime.spawn(async move {
        loop {
            refetch(&task_shared, &item_id).await;

            let again = {
                let mut state = task_shared.lock();
                let queued = state.refetches.get(&item_id).copied().unwrap_or(false);
                if queued {
                    state.refetches.insert(item_id.clone(), false);
                } else {
                    state.refetches.remove(&item_id);
                }
                queued
            };
            if !again {
                break;
            }
        }
    });
}

/// Re-read an item from the system of record and fold it into the view.
///
/// Failures are logged and surfaced as a notice, never returned.
pub(crate) async fn refetch(shared: &Shared, item_id: &str) {
    match fetch(shared, item_id).await {
        Ok(Some(item)) => {
            if install(&mut shared.lock(), item) {
                shared.notify(item_id, ChangeCause::Refetched);
            }
        }
        Ok(None) => {
            let removed = {
                let mut state = shared.lock();
                state.pending.forget(item_id);
                state.store.remove(item_id).is_some()
            };
            if removed {
                debug!(item_id, "Item no longer exists, removed from view");
                shared.notify(item_id, ChangeCause::Removed);
            }
        }
        Err(err) => {
            warn!(item_id, error = %err, "Re-fetch failed, keeping local state");
            shared.notice(Notice::new(item_id, NoticeKind::RefetchFailed));
        }
    }
}

/// Fetch and validate one item, bounded by the re-fetch deadline
pub(crate) async fn fetch(shared: &Shared, item_id: &str) -> Result<Option<ContentItem>> {
    let call = shared.backend.fetch_item(item_id, &shared.viewer_id);
    let remote = match timeout(shared.config.refetch_timeout(), call).await {
        Ok(result) => result?,
        Err(_) => return Err(EngagementError::Timeout(shared.config.refetch_timeout_ms)),
    };
    remote.map(ContentItem::try_from).transpose()
}

/// Install an authoritative snapshot.
///
/// Operations still in flight for the item are rebased: the snapshot
/// becomes their revert point and their target is applied on top, so the
/// viewer keeps seeing their latest action. A snapshot read before the
/// newest snapshot or realtime event already applied is discarded.
pub(crate) fn install(state: &mut ViewState, mut item: ContentItem) -> bool {
    if let Some(existing) = state.store.get(&item.id) {
        if let (Some(held), Some(incoming)) = (existing.version, item.version) {
            if incoming < held {
                debug!(item_id = %item.id, "Discarding snapshot older than the one held");
                return false;
            }
        }
    }

    let base = item.clone();
    for slot in [PendingSlot::Reaction, PendingSlot::Save] {
        if let Some(op) = state.pending.current_mut(&item.id, slot) {
            op.previous_state = base.clone();
            op.intent.apply_to(&mut item);
        }
    }

    state.store.put(item);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReactionKind, ReactionTally, Reactions};
    use crate::store::PendingIntent;
    use chrono::DateTime;

    #[test]
    fn test_install_rebases_pending_operation() {
        let mut state = ViewState::default();
        state.store.put(ContentItem::new("p1"));
        let love = PendingIntent::Reaction(Some(ReactionKind::Love));
        state.pending.record("p1", love, ContentItem::new("p1"));

        let fetched = ContentItem::new("p1")
            .with_reactions(Reactions::from_counts([(ReactionKind::Love, 6)], None))
            .with_version(DateTime::from_timestamp(10, 0).unwrap());
        assert!(install(&mut state, fetched.clone()));

        let item = state.store.get("p1").unwrap();
        assert_eq!(item.reactions.tally(ReactionKind::Love), ReactionTally::new(7, true));

        let op = state.pending.current("p1", PendingSlot::Reaction).unwrap();
        assert_eq!(op.previous_state, fetched);
    }

    #[test]
    fn test_install_discards_older_snapshot() {
        let mut state = ViewState::default();
        let newer = ContentItem::new("p1")
            .with_saved(true)
            .with_version(DateTime::from_timestamp(20, 0).unwrap());
        state.store.put(newer.clone());

        let older = ContentItem::new("p1").with_version(DateTime::from_timestamp(10, 0).unwrap());
        assert!(!install(&mut state, older));
        assert_eq!(state.store.get("p1").unwrap(), &newer);
    }
}
