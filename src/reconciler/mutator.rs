//! Optimistic mutator
//!
//! Applies the viewer's intent to the store synchronously, records the
//! pending operation, and drives the remote call in a background task.

use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{recovery, MutationHandle, MutationOutcome, Shared};
use crate::error::{EngagementError, Result};
use crate::model::{ContentItem, ReactionKind};
use crate::notify::ChangeCause;
use crate::store::PendingIntent;

/// Next reaction state for a tap on `kind`: withdraw if it is already the
/// viewer's reaction, otherwise switch to it.
pub(crate) fn plan_reaction(item: &ContentItem, kind: ReactionKind) -> PendingIntent {
    if item.reactions.tally(kind).viewer_has_reacted {
        PendingIntent::Reaction(None)
    } else {
        PendingIntent::Reaction(Some(kind))
    }
}

pub(crate) fn plan_save(item: &ContentItem) -> PendingIntent {
    PendingIntent::Save(!item.is_saved)
}

/// Apply an intent computed from the current local state and start its
/// remote call. `None` when the item is not in the store.
pub(crate) fn begin(
    shared: &Arc<Shared>,
    item_id: &str,
    plan: impl FnOnce(&ContentItem) -> PendingIntent,
) -> Option<MutationHandle> {
    let (intent, token) = {
        let mut state = shared.lock();
        let Some(item) = state.store.get_mut(item_id) else {
            debug!(item_id, "Ignoring action on item not in view");
            return None;
        };

        let intent = plan(item);
        let previous = item.clone();
        intent.apply_to(item);

        let (token, replaced) = state.pending.record(item_id, intent, previous);
        if let Some(replaced) = replaced {
            debug!(
                item_id,
                superseded = ?replaced.intent,
                intent = ?intent,
                "Replacing in-flight operation"
            );
        }
        (intent, token)
    };

    shared.notify(item_id, ChangeCause::Optimistic);

    let task = shared
        .runtime
        .spawn(drive(shared.clone(), item_id.to_string(), intent, token));

    Some(MutationHandle::new(item_id, intent, task))
}

async fn drive(
    shared: Arc<Shared>,
    item_id: String,
    intent: PendingIntent,
    token: u64,
) -> MutationOutcome {
    let result = send(&shared, &item_id, intent).await;

    let resolved = shared.lock().pending.resolve(&item_id, intent.slot(), token);
    let Some(op) = resolved else {
        debug!(
            item_id = %item_id,
            intent = ?intent,
            succeeded = result.is_ok(),
            "Superseded operation resolved, ignoring"
        );
        return MutationOutcome::Superseded;
    };

    match result {
        Ok(()) => {
            debug!(item_id = %item_id, intent = ?intent, "Mutation confirmed");
            MutationOutcome::Confirmed
        }
        Err(err) => {
            info!(
                item_id = %item_id,
                intent = ?intent,
                error = %err,
                "Mutation failed, recovering"
            );
            recovery::on_mutation_failure(shared, op, err).await;
            MutationOutcome::Reverted
        }
    }
}

/// Issue the remote write for an intent, bounded by the mutation deadline
async fn send(shared: &Shared, item_id: &str, intent: PendingIntent) -> Result<()> {
    let viewer_id = shared.viewer_id.as_str();
    let backend = shared.backend.as_ref();

    let call = async {
        match intent {
            PendingIntent::Reaction(Some(kind)) => {
                backend.upsert_reaction(item_id, viewer_id, kind).await
            }
            PendingIntent::Reaction(None) => backend.delete_reaction(item_id, viewer_id).await,
            PendingIntent::Save(saved) => backend.toggle_save(item_id, viewer_id, saved).await,
        }
    };

    match timeout(shared.config.mutation_timeout(), call).await {
        Ok(result) => result,
        Err(_) => Err(EngagementError::Timeout(shared.config.mutation_timeout_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reactions;

    #[test]
    fn test_plan_reaction_withdraws_active_kind() {
        let liked = Reactions::from_counts([(ReactionKind::Like, 3)], Some(ReactionKind::Like));
        let item = ContentItem::new("p1").with_reactions(liked);

        assert_eq!(plan_reaction(&item, ReactionKind::Like), PendingIntent::Reaction(None));
        assert_eq!(
            plan_reaction(&item, ReactionKind::Love),
            PendingIntent::Reaction(Some(ReactionKind::Love))
        );
    }

    #[test]
    fn test_plan_save_flips() {
        assert_eq!(plan_save(&ContentItem::new("p1")), PendingIntent::Save(true));
        assert_eq!(plan_save(&ContentItem::new("p1").with_saved(true)), PendingIntent::Save(false));
    }

    #[test]
    fn test_repeated_taps_stay_consistent() {
        let counts = [(ReactionKind::Like, 3), (ReactionKind::Wow, 1)];
        let mut item = ContentItem::new("p1").with_reactions(Reactions::from_counts(counts, None));
        let original = item.clone();

        use ReactionKind::{Like, Wow};
        for kind in [Like, Wow, Wow, Like, Like] {
            plan_reaction(&item, kind).apply_to(&mut item);
        }

        assert_eq!(item, original);
    }
}
