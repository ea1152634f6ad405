//! CampuzBuzz Engagement - optimistic reactions and saves for feed views
//!
//! Keeps a view's local copy of posts, the viewer's in-flight reaction and
//! save writes, and the backend's realtime change stream consistent with
//! each other.
//!
//! # Architecture
//!
//! - **Entity store**: the view's copy of each visible post ([`EntityStore`])
//! - **Optimistic mutator**: applies the viewer's action immediately and
//!   writes it to the backend in the background ([`Reconciler::react`],
//!   [`Reconciler::toggle_save`])
//! - **Reconciliation listener**: merges realtime row changes without
//!   double-applying the viewer's own echoes ([`Disposition`])
//! - **Recovery**: rolls back failed writes and re-fetches the item once
//!
//! The backend is reached only through [`RemoteMutations`] and
//! [`RealtimeSource`]; [`MemoryBackend`] implements both in-process.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use campuzbuzz_engagement::{MemoryBackend, Reconciler, ReconcilerConfig, ReactionKind};
//!
//! let backend = Arc::new(MemoryBackend::new().with_post("p1"));
//! let mut view = Reconciler::new("viewer-1", backend.clone(), ReconcilerConfig::default())?;
//! view.hydrate("p1").await?;
//! view.attach(backend.as_ref())?;
//!
//! let mut changes = view.subscribe_changes();
//! view.react("p1", ReactionKind::Love);
//! assert!(view.get_item("p1").unwrap().reactions.tally(ReactionKind::Love).viewer_has_reacted);
//! ```

// Data model
pub mod model;

// Local entity store and pending operations
pub mod store;

// Collaborator traits and the in-memory backend
pub mod backend;

// Reconciler façade
pub mod reconciler;

// Change and notice payloads
pub mod notify;

// Configuration
pub mod config;

// Error types
pub mod error;

// Re-export model types
pub use model::{
    ChangeEvent, ChangeKind, ContentItem, ItemPatch, RawChange, ReactionKind, ReactionTally,
    Reactions, RemoteItem, RowChange, Table,
};

// Re-export store types
pub use store::{EntityStore, PendingIntent, PendingOperation, PendingSlot, PendingTable};

// Re-export backend types
pub use backend::{EventCallback, MemoryBackend, RealtimeSource, RemoteMutations, Subscription};

// Re-export reconciler types
pub use reconciler::{Disposition, MutationHandle, MutationOutcome, Reconciler};

// Re-export notification types
pub use notify::{ChangeCause, Notice, NoticeKind, StoreChange};

// Re-export configuration and errors
pub use config::{ReconcilerConfig, TableConfig};
pub use error::{EngagementError, Result};
