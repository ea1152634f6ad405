//! Reaction kinds and per-item reaction aggregates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngagementError;

/// The fixed set of reactions a viewer can leave on a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Love,
    Laugh,
    Wow,
    Sad,
    Angry,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::Like,
        ReactionKind::Love,
        ReactionKind::Laugh,
        ReactionKind::Wow,
        ReactionKind::Sad,
        ReactionKind::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Love => "love",
            ReactionKind::Laugh => "laugh",
            ReactionKind::Wow => "wow",
            ReactionKind::Sad => "sad",
            ReactionKind::Angry => "angry",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = EngagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngagementError::Normalization(format!("unknown reaction kind '{}'", s)))
    }
}

/// Count and viewer flag for one reaction kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub count: u32,
    pub viewer_has_reacted: bool,
}

impl ReactionTally {
    pub fn new(count: u32, viewer_has_reacted: bool) -> Self {
        Self { count, viewer_has_reacted }
    }

    fn is_empty(&self) -> bool {
        self.count == 0 && !self.viewer_has_reacted
    }
}

/// Reaction aggregate of a single post.
///
/// Kinds with a zero count and no viewer flag are not stored, so two
/// aggregates describing the same state always compare equal. At most one
/// kind carries `viewer_has_reacted`, and that kind's count is at least 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<ReactionKind, ReactionTally>);

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw counts plus the viewer's own reaction.
    pub fn from_counts(
        counts: impl IntoIterator<Item = (ReactionKind, u32)>,
        viewer_reaction: Option<ReactionKind>,
    ) -> Self {
        let mut reactions = Self::default();
        for (kind, count) in counts {
            reactions.0.entry(kind).or_default().count = count;
        }
        reactions.set_viewer_flag(viewer_reaction);
        reactions.prune();
        reactions
    }

    /// Tally for `kind`, zeroed when absent
    pub fn tally(&self, kind: ReactionKind) -> ReactionTally {
        self.0.get(&kind).copied().unwrap_or_default()
    }

    pub fn count(&self, kind: ReactionKind) -> u32 {
        self.tally(kind).count
    }

    /// Total reactions across all kinds
    pub fn total(&self) -> u32 {
        self.0.values().map(|t| t.count).sum()
    }

    /// The kind the viewer currently has active, if any
    pub fn viewer_reaction(&self) -> Option<ReactionKind> {
        self.0
            .iter()
            .find(|(_, tally)| tally.viewer_has_reacted)
            .map(|(kind, _)| *kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReactionKind, ReactionTally)> + '_ {
        self.0.iter().map(|(k, t)| (*k, *t))
    }

    /// Move the viewer's reaction to `target`, adjusting counts on both sides.
    ///
    /// Returns false when the viewer already had exactly `target`.
    pub fn set_viewer_reaction(&mut self, target: Option<ReactionKind>) -> bool {
        let current = self.viewer_reaction();
        if current == target {
            return false;
        }
        if let Some(previous) = current {
            let tally = self.0.entry(previous).or_default();
            tally.count = tally.count.saturating_sub(1);
            tally.viewer_has_reacted = false;
        }
        if let Some(next) = target {
            let tally = self.0.entry(next).or_default();
            tally.count += 1;
            tally.viewer_has_reacted = true;
        }
        self.prune();
        true
    }

    /// Adjust the shared count of `kind` by a reaction that is not the viewer's.
    pub fn apply_foreign(&mut self, kind: ReactionKind, delta: i32) {
        let tally = self.0.entry(kind).or_default();
        let floor = u32::from(tally.viewer_has_reacted);
        tally.count = tally.count.saturating_add_signed(delta).max(floor);
        self.prune();
    }

    /// Replace all counts while keeping the viewer's flag where it was.
    pub fn replace_counts(&mut self, counts: impl IntoIterator<Item = (ReactionKind, u32)>) {
        let viewer = self.viewer_reaction();
        *self = Self::from_counts(counts, viewer);
    }

    fn set_viewer_flag(&mut self, viewer_reaction: Option<ReactionKind>) {
        for tally in self.0.values_mut() {
            tally.viewer_has_reacted = false;
        }
        if let Some(kind) = viewer_reaction {
            let tally = self.0.entry(kind).or_default();
            tally.viewer_has_reacted = true;
            tally.count = tally.count.max(1);
        }
    }

    fn prune(&mut self) {
        self.0.retain(|_, tally| !tally.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("like".parse::<ReactionKind>().unwrap(), ReactionKind::Like);
        assert_eq!(" Angry ".parse::<ReactionKind>().unwrap(), ReactionKind::Angry);
        assert!("meh".parse::<ReactionKind>().is_err());
    }

    #[test]
    fn test_switch_moves_one_count() {
        let mut reactions = Reactions::from_counts(
            [(ReactionKind::Like, 5), (ReactionKind::Love, 2)],
            Some(ReactionKind::Like),
        );

        assert!(reactions.set_viewer_reaction(Some(ReactionKind::Love)));

        assert_eq!(reactions.tally(ReactionKind::Like), ReactionTally::new(4, false));
        assert_eq!(reactions.tally(ReactionKind::Love), ReactionTally::new(3, true));
        assert_eq!(reactions.viewer_reaction(), Some(ReactionKind::Love));
    }

    #[test]
    fn test_withdraw_prunes_empty_kind() {
        let mut reactions = Reactions::new();
        reactions.set_viewer_reaction(Some(ReactionKind::Wow));
        reactions.set_viewer_reaction(None);

        assert_eq!(reactions, Reactions::new());
        assert_eq!(reactions.total(), 0);
    }

    #[test]
    fn test_same_target_is_noop() {
        let mut reactions =
            Reactions::from_counts([(ReactionKind::Sad, 1)], Some(ReactionKind::Sad));
        assert!(!reactions.set_viewer_reaction(Some(ReactionKind::Sad)));
        assert_eq!(reactions.count(ReactionKind::Sad), 1);
    }

    #[test]
    fn test_foreign_never_drops_below_viewer() {
        let mut reactions =
            Reactions::from_counts([(ReactionKind::Like, 1)], Some(ReactionKind::Like));
        reactions.apply_foreign(ReactionKind::Like, -1);
        assert_eq!(reactions.tally(ReactionKind::Like), ReactionTally::new(1, true));

        reactions.apply_foreign(ReactionKind::Laugh, -1);
        assert_eq!(reactions.count(ReactionKind::Laugh), 0);
    }

    #[test]
    fn test_flagged_kind_counts_at_least_one() {
        let reactions = Reactions::from_counts([], Some(ReactionKind::Love));
        assert_eq!(reactions.tally(ReactionKind::Love), ReactionTally::new(1, true));
    }

    #[test]
    fn test_serializes_as_map() {
        let reactions = Reactions::from_counts([(ReactionKind::Like, 3)], None);
        let json = serde_json::to_value(&reactions).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "like": { "count": 3, "viewer_has_reacted": false } })
        );
    }
}
