//! Conversation persistence.
//!
//! [`ConversationStore`] keeps one aggregate document per conversation
//! (`id == conversationId`, turns in order) on top of any [`DocumentStore`]
//! backend, guarding every append with an etag compare-and-swap.  The
//! [`legacy`] module reads the older one-document-per-turn layout and folds
//! it into aggregates.

pub mod backend;
pub mod document;
pub mod legacy;
pub mod store;

pub use backend::{CreateOutcome, DocumentStore, ItemQuery, ReplaceOutcome, StoredItem};
pub use document::{ConversationDocument, FlatTurnDocument};
pub use store::ConversationStore;
