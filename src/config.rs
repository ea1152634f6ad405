//! Reconciler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Reconciler`](crate::Reconciler) bound to one view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Realtime table and column names
    #[serde(default)]
    pub tables: TableConfig,

    /// Filter expression for the reaction and save subscriptions.
    ///
    /// A `<item_column>=eq.<id>` filter is rewritten against
    /// `post_id_column` for the posts subscription.
    #[serde(default)]
    pub subscription_filter: Option<String>,

    /// Deadline for a single remote mutation
    #[serde(default = "default_mutation_timeout")]
    pub mutation_timeout_ms: u64,

    /// Deadline for the recovery re-fetch
    #[serde(default = "default_refetch_timeout")]
    pub refetch_timeout_ms: u64,

    /// Delay between a revert and its re-fetch
    #[serde(default)]
    pub refetch_delay_ms: u64,

    /// Buffer size of the store change stream
    #[serde(default = "default_change_capacity")]
    pub change_channel_capacity: usize,

    /// Buffer size of the notice stream
    #[serde(default = "default_notice_capacity")]
    pub notice_channel_capacity: usize,
}

/// Table and column names used by the realtime payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default = "default_reactions_table")]
    pub reactions: String,
    #[serde(default = "default_saves_table")]
    pub saves: String,
    #[serde(default = "default_posts_table")]
    pub posts: String,

    /// Column on reaction/save rows naming the post
    #[serde(default = "default_item_column")]
    pub item_column: String,
    /// Column on reaction/save rows naming the acting user
    #[serde(default = "default_viewer_column")]
    pub viewer_column: String,
    /// Column on reaction rows holding the reaction kind
    #[serde(default = "default_kind_column")]
    pub kind_column: String,
    /// Primary key column on post rows
    #[serde(default = "default_post_id_column")]
    pub post_id_column: String,
    /// JSON aggregate column on post rows (`{"like": 3, ...}`)
    #[serde(default = "default_aggregate_column")]
    pub aggregate_column: String,
}

// Defaults
fn default_mutation_timeout() -> u64 { 10_000 }
fn default_refetch_timeout() -> u64 { 10_000 }
fn default_change_capacity() -> usize { 256 }
fn default_notice_capacity() -> usize { 32 }
fn default_reactions_table() -> String { "post_reactions".to_string() }
fn default_saves_table() -> String { "saved_posts".to_string() }
fn default_posts_table() -> String { "posts".to_string() }
fn default_item_column() -> String { "post_id".to_string() }
fn default_viewer_column() -> String { "user_id".to_string() }
fn default_kind_column() -> String { "reaction_type".to_string() }
fn default_post_id_column() -> String { "id".to_string() }
fn default_aggregate_column() -> String { "reactions".to_string() }

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            reactions: default_reactions_table(),
            saves: default_saves_table(),
            posts: default_posts_table(),
            item_column: default_item_column(),
            viewer_column: default_viewer_column(),
            kind_column: default_kind_column(),
            post_id_column: default_post_id_column(),
            aggregate_column: default_aggregate_column(),
        }
    }
}

impl TableConfig {
    /// The three tables a view subscribes to
    pub fn all(&self) -> [&str; 3] {
        [&self.reactions, &self.saves, &self.posts]
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tables: TableConfig::default(),
            subscription_filter: None,
            mutation_timeout_ms: default_mutation_timeout(),
            refetch_timeout_ms: default_refetch_timeout(),
            refetch_delay_ms: 0,
            change_channel_capacity: default_change_capacity(),
            notice_channel_capacity: default_notice_capacity(),
        }
    }
}

impl ReconcilerConfig {
    /// Configuration for interactive feeds (short deadlines, small re-fetch delay)
    pub fn for_interactive() -> Self {
        Self {
            mutation_timeout_ms: 5_000,
            refetch_timeout_ms: 5_000,
            refetch_delay_ms: 250,
            ..Default::default()
        }
    }

    /// Configuration for tests against the in-memory backend
    pub fn for_tests() -> Self {
        Self {
            mutation_timeout_ms: 1_000,
            refetch_timeout_ms: 1_000,
            refetch_delay_ms: 0,
            ..Default::default()
        }
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }

    pub fn refetch_timeout(&self) -> Duration {
        Duration::from_millis(self.refetch_timeout_ms)
    }

    pub fn refetch_delay(&self) -> Duration {
        Duration::from_millis(self.refetch_delay_ms)
    }

    /// Filter expression for subscriptions, `*` when unset
    pub fn filter(&self) -> &str {
        self.subscription_filter.as_deref().unwrap_or("*")
    }

    /// Filter expression for one table's subscription
    pub fn filter_for(&self, table: &str) -> String {
        let filter = self.filter();
        if table == self.tables.posts {
            let item_prefix = format!("{}=eq.", self.tables.item_column);
            if let Some(id) = filter.strip_prefix(&item_prefix) {
                return format!("{}=eq.{}", self.tables.post_id_column, id);
            }
        }
        filter.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ReconcilerConfig = serde_json::from_value(serde_json::json!({
            "mutation_timeout_ms": 2500,
            "tables": { "reactions": "reactions" }
        }))
        .unwrap();

        assert_eq!(config.mutation_timeout_ms, 2500);
        assert_eq!(config.refetch_timeout_ms, 10_000);
        assert_eq!(config.tables.reactions, "reactions");
        assert_eq!(config.tables.saves, "saved_posts");
        assert_eq!(config.tables.kind_column, "reaction_type");
        assert_eq!(config.filter(), "*");
    }

    #[test]
    fn test_presets() {
        assert_eq!(
            ReconcilerConfig::for_interactive().refetch_delay(),
            Duration::from_millis(250)
        );
        assert_eq!(ReconcilerConfig::for_tests().mutation_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_item_filter_targets_post_key() {
        let config = ReconcilerConfig {
            subscription_filter: Some("post_id=eq.p1".to_string()),
            ..Default::default()
        };

        assert_eq!(config.filter_for("post_reactions"), "post_id=eq.p1");
        assert_eq!(config.filter_for("saved_posts"), "post_id=eq.p1");
        assert_eq!(config.filter_for("posts"), "id=eq.p1");

        let unfiltered = ReconcilerConfig::default();
        assert_eq!(unfiltered.filter_for("posts"), "*");
    }
}
