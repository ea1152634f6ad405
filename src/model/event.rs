//! Realtime change events
//!
//! The backend delivers row changes as loosely-typed JSON ([`RawChange`]).
//! They are validated into [`ChangeEvent`] before anything touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::item::parse_counts;
use super::reaction::ReactionKind;
use crate::config::TableConfig;
use crate::error::{EngagementError, Result};

/// A row change as delivered by the realtime transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Row after the change (insert/update)
    #[serde(default)]
    pub new: JsonValue,
    /// Row before the change (update/delete, when the table exposes it)
    #[serde(default)]
    pub old: JsonValue,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Reactions,
    Saves,
    Posts,
}

/// Typed content of the changed row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange {
    /// A viewer's reaction row; `kind` is absent on deletes that only carry keys
    Reaction { viewer_id: String, kind: Option<ReactionKind> },
    Save { viewer_id: String },
    /// A post row; `counts` is its reaction aggregate when present
    Post { counts: Option<Vec<(ReactionKind, u32)>> },
}

/// Validated realtime event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub content_item_id: String,
    pub change_kind: ChangeKind,
    pub table: Table,
    pub row: RowChange,
    /// Previous row for updates, when the transport provides it
    pub old_row: Option<RowChange>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn new(
        content_item_id: impl Into<String>,
        change_kind: ChangeKind,
        table: Table,
        row: RowChange,
    ) -> Self {
        Self {
            content_item_id: content_item_id.into(),
            change_kind,
            table,
            row,
            old_row: None,
            committed_at: None,
        }
    }

    pub fn with_old_row(mut self, old_row: RowChange) -> Self {
        self.old_row = Some(old_row);
        self
    }

    pub fn committed_at(mut self, at: DateTime<Utc>) -> Self {
        self.committed_at = Some(at);
        self
    }

    /// Whether this event concerns `viewer_id`'s own row
    pub fn is_from(&self, viewer_id: &str) -> bool {
        match &self.row {
            RowChange::Reaction { viewer_id: v, .. } | RowChange::Save { viewer_id: v } => {
                v == viewer_id
            }
            RowChange::Post { .. } => false,
        }
    }

    /// Validate a raw payload against the configured table layout.
    pub fn normalize(raw: &RawChange, tables: &TableConfig) -> Result<Self> {
        let change_kind = match raw.event_type.to_ascii_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            other => {
                return Err(EngagementError::Normalization(format!(
                    "unknown event type '{}'",
                    other
                )))
            }
        };

        let table = if raw.table == tables.reactions {
            Table::Reactions
        } else if raw.table == tables.saves {
            Table::Saves
        } else if raw.table == tables.posts {
            Table::Posts
        } else {
            return Err(EngagementError::Normalization(format!("unexpected table '{}'", raw.table)));
        };

        // Deletes describe the row through `old`
        let current = match change_kind {
            ChangeKind::Delete => &raw.old,
            _ => &raw.new,
        };

        let is_delete = change_kind == ChangeKind::Delete;
        let (content_item_id, row) = parse_row(table, current, tables, is_delete)?;

        let old_row = match change_kind {
            ChangeKind::Update if has_fields(&raw.old) => parse_row(table, &raw.old, tables, true)
                .ok()
                .map(|(_, row)| row),
            _ => None,
        };

        Ok(Self {
            content_item_id,
            change_kind,
            table,
            row,
            old_row,
            committed_at: raw.commit_timestamp,
        })
    }
}

fn has_fields(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|map| !map.is_empty())
}

fn string_field(row: &JsonValue, column: &str) -> Result<String> {
    match row.get(column) {
        Some(JsonValue::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        _ => Err(EngagementError::Normalization(format!("missing column '{}'", column))),
    }
}

fn parse_row(
    table: Table,
    row: &JsonValue,
    tables: &TableConfig,
    kind_optional: bool,
) -> Result<(String, RowChange)> {
    match table {
        Table::Reactions => {
            let item_id = string_field(row, &tables.item_column)?;
            let viewer_id = string_field(row, &tables.viewer_column)?;
            let kind = match row.get(&tables.kind_column) {
                Some(JsonValue::String(s)) => Some(s.parse::<ReactionKind>()?),
                _ if kind_optional => None,
                _ => {
                    return Err(EngagementError::Normalization(format!(
                        "missing column '{}'",
                        tables.kind_column
                    )))
                }
            };
            Ok((item_id, RowChange::Reaction { viewer_id, kind }))
        }
        Table::Saves => {
            let item_id = string_field(row, &tables.item_column)?;
            let viewer_id = string_field(row, &tables.viewer_column)?;
            Ok((item_id, RowChange::Save { viewer_id }))
        }
        Table::Posts => {
            let item_id = string_field(row, &tables.post_id_column)?;
            let counts = match row.get(&tables.aggregate_column) {
                Some(blob) => Some(parse_counts(blob)?),
                None => None,
            };
            Ok((item_id, RowChange::Post { counts }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(table: &str, event_type: &str, new: JsonValue, old: JsonValue) -> RawChange {
        RawChange {
            table: table.to_string(),
            event_type: event_type.to_string(),
            new,
            old,
            commit_timestamp: None,
        }
    }

    #[test]
    fn test_normalize_reaction_insert() {
        let tables = TableConfig::default();
        let event = ChangeEvent::normalize(
            &raw(
                "post_reactions",
                "INSERT",
                json!({ "post_id": "p1", "user_id": "u2", "reaction_type": "like" }),
                JsonValue::Null,
            ),
            &tables,
        )
        .unwrap();

        assert_eq!(event.content_item_id, "p1");
        assert_eq!(event.change_kind, ChangeKind::Insert);
        assert_eq!(event.table, Table::Reactions);
        assert_eq!(
            event.row,
            RowChange::Reaction { viewer_id: "u2".into(), kind: Some(ReactionKind::Like) }
        );
        assert!(event.is_from("u2"));
        assert!(!event.is_from("u1"));
    }

    #[test]
    fn test_normalize_delete_reads_old_row() {
        let tables = TableConfig::default();
        let event = ChangeEvent::normalize(
            &raw(
                "post_reactions",
                "DELETE",
                json!({}),
                json!({ "post_id": "p1", "user_id": "u2" }),
            ),
            &tables,
        )
        .unwrap();

        assert_eq!(event.change_kind, ChangeKind::Delete);
        assert_eq!(event.row, RowChange::Reaction { viewer_id: "u2".into(), kind: None });
    }

    #[test]
    fn test_normalize_update_keeps_old_kind() {
        let tables = TableConfig::default();
        let event = ChangeEvent::normalize(
            &raw(
                "post_reactions",
                "UPDATE",
                json!({ "post_id": "p1", "user_id": "u2", "reaction_type": "wow" }),
                json!({ "post_id": "p1", "user_id": "u2", "reaction_type": "sad" }),
            ),
            &tables,
        )
        .unwrap();

        assert_eq!(
            event.old_row,
            Some(RowChange::Reaction { viewer_id: "u2".into(), kind: Some(ReactionKind::Sad) })
        );
    }

    #[test]
    fn test_normalize_post_aggregate() {
        let tables = TableConfig::default();
        let event = ChangeEvent::normalize(
            &raw(
                "posts",
                "UPDATE",
                json!({ "id": 42, "reactions": { "love": 7 } }),
                JsonValue::Null,
            ),
            &tables,
        )
        .unwrap();

        assert_eq!(event.content_item_id, "42");
        assert_eq!(event.row, RowChange::Post { counts: Some(vec![(ReactionKind::Love, 7)]) });
    }

    #[test]
    fn test_normalize_rejects_malformed() {
        let tables = TableConfig::default();

        let unknown_kind = raw(
            "post_reactions",
            "INSERT",
            json!({ "post_id": "p1", "user_id": "u2", "reaction_type": "yawn" }),
            JsonValue::Null,
        );
        assert!(ChangeEvent::normalize(&unknown_kind, &tables).is_err());

        let missing_kind = raw(
            "post_reactions",
            "INSERT",
            json!({ "post_id": "p1", "user_id": "u2" }),
            JsonValue::Null,
        );
        assert!(ChangeEvent::normalize(&missing_kind, &tables).is_err());

        let other_table = raw("comments", "INSERT", json!({ "post_id": "p1" }), JsonValue::Null);
        assert!(ChangeEvent::normalize(&other_table, &tables).is_err());

        let bad_type = raw("saved_posts", "TRUNCATE", json!({}), JsonValue::Null);
        assert!(ChangeEvent::normalize(&bad_type, &tables).is_err());
    }
}
