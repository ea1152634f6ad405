//! Engagement data model
//!
//! Everything here is plain data. Loosely-typed backend payloads are
//! validated into these types on ingress.

mod event;
mod item;
mod reaction;

pub use event::{ChangeEvent, ChangeKind, RawChange, RowChange, Table};
pub use item::{parse_counts, ContentItem, ItemPatch, RemoteItem};
pub use reaction::{ReactionKind, ReactionTally, Reactions};
