//! Content items and their remote representation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::reaction::{ReactionKind, Reactions};
use crate::error::{EngagementError, Result};

/// A post and the viewer-relative engagement state shown for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub reactions: Reactions,
    pub is_saved: bool,
    /// Server timestamp of the newest snapshot or event folded into this item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reactions: Reactions::new(),
            is_saved: false,
            version: None,
        }
    }

    pub fn with_reactions(mut self, reactions: Reactions) -> Self {
        self.reactions = reactions;
        self
    }

    pub fn with_saved(mut self, is_saved: bool) -> Self {
        self.is_saved = is_saved;
        self
    }

    pub fn with_version(mut self, version: DateTime<Utc>) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether a server timestamp is already covered by this item
    pub fn has_seen(&self, at: DateTime<Utc>) -> bool {
        self.version.is_some_and(|version| at <= version)
    }

    /// Advance the version marker, never moving it backwards
    pub fn observe(&mut self, at: Option<DateTime<Utc>>) {
        if let Some(at) = at {
            if !self.has_seen(at) {
                self.version = Some(at);
            }
        }
    }

    /// Apply a shallow patch
    pub fn merge(&mut self, patch: ItemPatch) {
        if let Some(reactions) = patch.reactions {
            self.reactions = reactions;
        }
        if let Some(is_saved) = patch.is_saved {
            self.is_saved = is_saved;
        }
        self.observe(patch.version);
    }
}

/// Shallow update for a [`ContentItem`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub reactions: Option<Reactions>,
    pub is_saved: Option<bool>,
    pub version: Option<DateTime<Utc>>,
}

impl ItemPatch {
    pub fn reactions(reactions: Reactions) -> Self {
        Self { reactions: Some(reactions), ..Default::default() }
    }

    pub fn saved(is_saved: bool) -> Self {
        Self { is_saved: Some(is_saved), ..Default::default() }
    }

    /// Patch that overwrites everything with `item`
    pub fn replace_with(item: ContentItem) -> Self {
        Self {
            reactions: Some(item.reactions),
            is_saved: Some(item.is_saved),
            version: item.version,
        }
    }

    pub fn at(mut self, version: Option<DateTime<Utc>>) -> Self {
        self.version = version;
        self
    }
}

/// A post as returned by the backend's fetch call, before validation.
///
/// `reactions` is the loosely-typed aggregate column (`{"like": 3}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    #[serde(default)]
    pub reactions: JsonValue,
    #[serde(default)]
    pub viewer_reaction: Option<String>,
    #[serde(default)]
    pub is_saved: bool,
    /// Server time the snapshot was read at
    #[serde(default)]
    pub version: Option<DateTime<Utc>>,
}

impl TryFrom<RemoteItem> for ContentItem {
    type Error = EngagementError;

    fn try_from(remote: RemoteItem) -> Result<Self> {
        let counts = parse_counts(&remote.reactions)?;
        let viewer = remote
            .viewer_reaction
            .as_deref()
            .map(str::parse::<ReactionKind>)
            .transpose()?;

        Ok(ContentItem {
            id: remote.id,
            reactions: Reactions::from_counts(counts, viewer),
            is_saved: remote.is_saved,
            version: remote.version,
        })
    }
}

/// Parse a reaction aggregate blob into typed counts.
///
/// `null` is an empty aggregate. Every key must name a known kind and every
/// value must be a non-negative integer.
pub fn parse_counts(blob: &JsonValue) -> Result<Vec<(ReactionKind, u32)>> {
    let map = match blob {
        JsonValue::Null => return Ok(Vec::new()),
        JsonValue::Object(map) => map,
        other => {
            return Err(EngagementError::Normalization(format!(
                "reaction aggregate must be an object, got {}",
                other
            )))
        }
    };

    map.iter()
        .map(|(key, value)| {
            let kind = key.parse::<ReactionKind>()?;
            let count = value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    EngagementError::Normalization(format!(
                        "invalid count for '{}': {}",
                        key, value
                    ))
                })?;
            Ok((kind, count))
        })
        .collect()
}
