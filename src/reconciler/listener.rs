//! Reconciliation listener
//!
//! Merges validated realtime events into the view state. The viewer's own
//! rows are never re-applied while an operation for the same slot is in
//! flight; other viewers' reactions only move shared counts.

use tracing::debug;

use super::ViewState;
use crate::model::{ChangeEvent, ChangeKind, ReactionKind, RowChange, Table};
use crate::store::{PendingIntent, PendingSlot};

/// What the listener did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Echo of the viewer's current in-flight operation; dropped
    Echo,
    /// The viewer's own row, superseded by a newer in-flight operation; dropped
    Shadowed,
    /// Another viewer's reaction merged into the shared counts
    Foreign,
    /// Applied to the item directly
    Direct,
    /// The item already reflected the event
    Unchanged,
    /// Committed at or before the newest snapshot or event the item holds
    Stale,
    /// The item was deleted and dropped from the view
    Removed,
    /// Not enough information to merge; the item must be re-fetched
    NeedsRefetch,
    /// Concerns an item or row this view does not track
    Ignored,
}

impl Disposition {
    /// Whether the store changed
    pub fn changed_store(&self) -> bool {
        matches!(self, Disposition::Foreign | Disposition::Direct | Disposition::Removed)
    }

    /// Whether the item now reflects the event's commit
    fn is_reflected(&self) -> bool {
        matches!(
            self,
            Disposition::Echo | Disposition::Foreign | Disposition::Direct | Disposition::Unchanged
        )
    }
}

pub(crate) fn apply(state: &mut ViewState, viewer_id: &str, event: &ChangeEvent) -> Disposition {
    let id = event.content_item_id.as_str();
    let Some(item) = state.store.get(id) else {
        return Disposition::Ignored;
    };

    if let Some(at) = event.committed_at {
        if item.has_seen(at) {
            debug!(item_id = id, table = ?event.table, "Dropping event older than snapshot");
            return Disposition::Stale;
        }
    }

    let disposition = match event.table {
        Table::Reactions => apply_reaction(state, viewer_id, event),
        Table::Saves => apply_save(state, viewer_id, event),
        Table::Posts => apply_post(state, event),
    };

    if disposition.is_reflected() {
        if let Some(item) = state.store.get_mut(id) {
            item.observe(event.committed_at);
        }
    }

    debug!(
        item_id = id,
        table = ?event.table,
        change = ?event.change_kind,
        disposition = ?disposition,
        "Realtime event reconciled"
    );
    disposition
}

fn apply_reaction(state: &mut ViewState, viewer_id: &str, event: &ChangeEvent) -> Disposition {
    let id = event.content_item_id.as_str();
    let RowChange::Reaction { viewer_id: actor, kind } = &event.row else {
        return Disposition::Ignored;
    };

    if actor == viewer_id {
        let target = match event.change_kind {
            ChangeKind::Delete => None,
            _ => match kind {
                Some(kind) => Some(*kind),
                None => return Disposition::Ignored,
            },
        };

        if let Some(op) = state.pending.current(id, PendingSlot::Reaction) {
            return if op.intent == PendingIntent::Reaction(target) {
                Disposition::Echo
            } else {
                Disposition::Shadowed
            };
        }

        // Another device, or an echo arriving after confirmation
        return match state.store.get_mut(id) {
            Some(item) => {
                if item.reactions.set_viewer_reaction(target) {
                    Disposition::Direct
                } else {
                    Disposition::Unchanged
                }
            }
            None => Disposition::Unchanged,
        };
    }

    let deltas: Vec<(ReactionKind, i32)> = match (event.change_kind, kind) {
        (ChangeKind::Insert, Some(kind)) => vec![(*kind, 1)],
        (ChangeKind::Delete, Some(kind)) => vec![(*kind, -1)],
        (ChangeKind::Update, Some(new)) => match &event.old_row {
            Some(RowChange::Reaction { kind: Some(old), .. }) if old == new => {
                return Disposition::Unchanged
            }
            Some(RowChange::Reaction { kind: Some(old), .. }) => vec![(*old, -1), (*new, 1)],
            _ => return Disposition::NeedsRefetch,
        },
        _ => return Disposition::NeedsRefetch,
    };

    if let Some(item) = state.store.get_mut(id) {
        for (kind, delta) in &deltas {
            item.reactions.apply_foreign(*kind, *delta);
        }
    }
    // Keep the revert snapshot in step so a rollback does not undo other viewers
    if let Some(op) = state.pending.current_mut(id, PendingSlot::Reaction) {
        for (kind, delta) in &deltas {
            op.previous_state.reactions.apply_foreign(*kind, *delta);
        }
    }
    Disposition::Foreign
}

fn apply_save(state: &mut ViewState, viewer_id: &str, event: &ChangeEvent) -> Disposition {
    let id = event.content_item_id.as_str();
    if !event.is_from(viewer_id) {
        return Disposition::Ignored;
    }

    let saved = event.change_kind != ChangeKind::Delete;

    if let Some(op) = state.pending.current(id, PendingSlot::Save) {
        return if op.intent == PendingIntent::Save(saved) {
            Disposition::Echo
        } else {
            Disposition::Shadowed
        };
    }

    match state.store.get_mut(id) {
        Some(item) if item.is_saved != saved => {
            item.is_saved = saved;
            Disposition::Direct
        }
        _ => Disposition::Unchanged,
    }
}

fn apply_post(state: &mut ViewState, event: &ChangeEvent) -> Disposition {
    let id = event.content_item_id.as_str();

    if event.change_kind == ChangeKind::Delete {
        state.store.remove(id);
        state.pending.forget(id);
        return Disposition::Removed;
    }

    let RowChange::Post { counts: Some(counts) } = &event.row else {
        return Disposition::Unchanged;
    };

    // Unknown whether the aggregate includes the in-flight write
    if state.pending.is_pending(id, PendingSlot::Reaction) {
        return Disposition::Shadowed;
    }

    match state.store.get_mut(id) {
        Some(item) => {
            let before = item.reactions.clone();
            item.reactions.replace_counts(counts.iter().copied());
            if item.reactions == before {
                Disposition::Unchanged
            } else {
                Disposition::Direct
            }
        }
        None => Disposition::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentItem, ReactionTally, Reactions};
    use chrono::DateTime;

    const VIEWER: &str = "me";
    const LIKE_INTENT: PendingIntent = PendingIntent::Reaction(Some(ReactionKind::Like));

    fn state_with(item: ContentItem) -> ViewState {
        let mut state = ViewState::default();
        state.store.put(item);
        state
    }

    fn reaction(actor: &str, change: ChangeKind, kind: Option<ReactionKind>) -> ChangeEvent {
        ChangeEvent::new(
            "p1",
            change,
            Table::Reactions,
            RowChange::Reaction { viewer_id: actor.to_string(), kind },
        )
    }

    fn likes(count: u32, mine: bool) -> ContentItem {
        ContentItem::new("p1").with_reactions(Reactions::from_counts(
            [(ReactionKind::Like, count)],
            mine.then_some(ReactionKind::Like),
        ))
    }

    #[test]
    fn test_own_echo_is_dropped_while_pending() {
        let mut state = state_with(likes(4, true));
        state.pending.record("p1", LIKE_INTENT, likes(3, false));

        let echo = reaction(VIEWER, ChangeKind::Insert, Some(ReactionKind::Like));
        let disposition = apply(&mut state, VIEWER, &echo);

        assert_eq!(disposition, Disposition::Echo);
        assert_eq!(state.store.get("p1").unwrap().reactions.count(ReactionKind::Like), 4);
    }

    #[test]
    fn test_superseded_echo_is_shadowed() {
        let mut state = state_with(likes(3, false));
        state.pending.record("p1", PendingIntent::Reaction(None), likes(4, true));

        let echo = reaction(VIEWER, ChangeKind::Insert, Some(ReactionKind::Like));
        let disposition = apply(&mut state, VIEWER, &echo);

        assert_eq!(disposition, Disposition::Shadowed);
        assert_eq!(state.store.get("p1").unwrap(), &likes(3, false));
    }

    #[test]
    fn test_foreign_reaction_moves_count_only() {
        let mut state = state_with(likes(4, true));
        state.pending.record("p1", LIKE_INTENT, likes(3, false));

        let foreign = reaction("other", ChangeKind::Insert, Some(ReactionKind::Like));
        let disposition = apply(&mut state, VIEWER, &foreign);

        assert_eq!(disposition, Disposition::Foreign);
        let item = state.store.get("p1").unwrap();
        assert_eq!(item.reactions.tally(ReactionKind::Like), ReactionTally::new(5, true));

        let snapshot = &state.pending.current("p1", PendingSlot::Reaction).unwrap().previous_state;
        assert_eq!(snapshot.reactions.tally(ReactionKind::Like), ReactionTally::new(4, false));
    }

    #[test]
    fn test_foreign_update_switches_kind() {
        let mut state = state_with(likes(2, false));
        let event = reaction("other", ChangeKind::Update, Some(ReactionKind::Laugh)).with_old_row(
            RowChange::Reaction { viewer_id: "other".into(), kind: Some(ReactionKind::Like) },
        );

        assert_eq!(apply(&mut state, VIEWER, &event), Disposition::Foreign);
        let item = state.store.get("p1").unwrap();
        assert_eq!(item.reactions.count(ReactionKind::Like), 1);
        assert_eq!(item.reactions.count(ReactionKind::Laugh), 1);
    }

    #[test]
    fn test_foreign_update_without_old_row_needs_refetch() {
        let mut state = state_with(likes(2, false));
        let event = reaction("other", ChangeKind::Update, Some(ReactionKind::Laugh));
        assert_eq!(apply(&mut state, VIEWER, &event), Disposition::NeedsRefetch);
        assert_eq!(state.store.get("p1").unwrap(), &likes(2, false));
    }

    #[test]
    fn test_own_event_without_pending_is_idempotent() {
        let mut state = state_with(likes(4, true));

        let late_echo = reaction(VIEWER, ChangeKind::Insert, Some(ReactionKind::Like));
        assert_eq!(apply(&mut state, VIEWER, &late_echo), Disposition::Unchanged);
        assert_eq!(state.store.get("p1").unwrap().reactions.count(ReactionKind::Like), 4);

        let other_device = reaction(VIEWER, ChangeKind::Delete, None);
        assert_eq!(apply(&mut state, VIEWER, &other_device), Disposition::Direct);
        assert_eq!(state.store.get("p1").unwrap(), &likes(3, false));
    }

    #[test]
    fn test_stale_event_is_dropped() {
        let snapshot_at = DateTime::from_timestamp(1_000, 0).unwrap();
        let mut state = state_with(likes(3, false).with_version(snapshot_at));

        let event = reaction("other", ChangeKind::Insert, Some(ReactionKind::Like))
            .committed_at(DateTime::from_timestamp(999, 0).unwrap());

        assert_eq!(apply(&mut state, VIEWER, &event), Disposition::Stale);
        assert_eq!(state.store.get("p1").unwrap().reactions.count(ReactionKind::Like), 3);
    }

    #[test]
    fn test_applied_event_advances_version() {
        let snapshot_at = DateTime::from_timestamp(1_000, 0).unwrap();
        let mut state = state_with(likes(3, false).with_version(snapshot_at));

        let first = DateTime::from_timestamp(1_005, 0).unwrap();
        let event =
            reaction("other", ChangeKind::Insert, Some(ReactionKind::Like)).committed_at(first);
        assert_eq!(apply(&mut state, VIEWER, &event), Disposition::Foreign);
        assert_eq!(state.store.get("p1").unwrap().version, Some(first));

        let earlier = reaction("other", ChangeKind::Delete, Some(ReactionKind::Like))
            .committed_at(DateTime::from_timestamp(1_002, 0).unwrap());
        assert_eq!(apply(&mut state, VIEWER, &earlier), Disposition::Stale);
        assert_eq!(state.store.get("p1").unwrap().reactions.count(ReactionKind::Like), 4);
    }

    #[test]
    fn test_unmerged_event_keeps_version() {
        let snapshot_at = DateTime::from_timestamp(1_000, 0).unwrap();
        let mut state = state_with(likes(2, false).with_version(snapshot_at));

        let event = reaction("other", ChangeKind::Update, Some(ReactionKind::Laugh))
            .committed_at(DateTime::from_timestamp(1_005, 0).unwrap());
        assert_eq!(apply(&mut state, VIEWER, &event), Disposition::NeedsRefetch);
        assert_eq!(state.store.get("p1").unwrap().version, Some(snapshot_at));
    }

    #[test]
    fn test_saves_follow_pending_and_viewer() {
        let mut state = state_with(ContentItem::new("p1"));
        let save = |actor: &str, change| {
            let row = RowChange::Save { viewer_id: actor.to_string() };
            ChangeEvent::new("p1", change, Table::Saves, row)
        };

        let foreign = save("other", ChangeKind::Insert);
        assert_eq!(apply(&mut state, VIEWER, &foreign), Disposition::Ignored);

        state.pending.record("p1", PendingIntent::Save(true), ContentItem::new("p1"));
        assert_eq!(apply(&mut state, VIEWER, &save(VIEWER, ChangeKind::Insert)), Disposition::Echo);
        let unsave = save(VIEWER, ChangeKind::Delete);
        assert_eq!(apply(&mut state, VIEWER, &unsave), Disposition::Shadowed);
        assert!(!state.store.get("p1").unwrap().is_saved);
    }

    #[test]
    fn test_post_events() {
        let mut state = state_with(likes(3, true));
        let update = ChangeEvent::new(
            "p1",
            ChangeKind::Update,
            Table::Posts,
            RowChange::Post { counts: Some(vec![(ReactionKind::Like, 9), (ReactionKind::Sad, 1)]) },
        );

        assert_eq!(apply(&mut state, VIEWER, &update), Disposition::Direct);
        let item = state.store.get("p1").unwrap();
        assert_eq!(item.reactions.tally(ReactionKind::Like), ReactionTally::new(9, true));
        assert_eq!(item.reactions.count(ReactionKind::Sad), 1);

        state.pending.record("p1", PendingIntent::Save(true), ContentItem::new("p1"));
        let gone = RowChange::Post { counts: None };
        let delete = ChangeEvent::new("p1", ChangeKind::Delete, Table::Posts, gone);
        assert_eq!(apply(&mut state, VIEWER, &delete), Disposition::Removed);
        assert!(state.store.get("p1").is_none());
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_untracked_item_is_ignored() {
        let mut state = ViewState::default();
        let event = reaction("other", ChangeKind::Insert, Some(ReactionKind::Like));
        assert_eq!(apply(&mut state, VIEWER, &event), Disposition::Ignored);
    }
}
