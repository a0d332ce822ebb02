//! Aggregate conversation store.
//!
//! One document per conversation holds every turn in order. Appends are a
//! read-modify-write guarded by the document etag: the turn id is derived
//! from the document as read, and the write only lands if nobody else wrote
//! in between. A lost race re-reads and retries with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use ct_domain::config::StoreConfig;
use ct_domain::error::{Error, Result};
use ct_domain::log::LogEvent;
use ct_domain::turn::{format_turn_id, parse_turn_id, TurnDraft, TurnRecord};

use crate::backend::{CreateOutcome, DocumentStore, ItemQuery, ReplaceOutcome};
use crate::document::ConversationDocument;

/// Upper bound on a single backoff sleep, before jitter.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Largest random extension of a backoff sleep, as a fraction of it.
const JITTER: f64 = 0.5;

pub struct ConversationStore {
    backend: Arc<dyn DocumentStore>,
    max_conflict_retries: u32,
    base_backoff: Duration,
    cross_partition_queries: bool,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn DocumentStore>, cfg: &StoreConfig) -> Self {
        Self {
            backend,
            max_conflict_retries: cfg.max_conflict_retries,
            base_backoff: Duration::from_millis(cfg.conflict_backoff_ms),
            cross_partition_queries: cfg.cross_partition_queries,
        }
    }

    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    /// Create the database and container if they do not exist yet.
    pub async fn provision(&self, partition_key_path: &str) -> Result<()> {
        self.backend.create_database_if_absent().await?;
        self.backend
            .create_container_if_absent(partition_key_path)
            .await
    }

    /// Create an empty conversation document unless one already exists.
    ///
    /// An existing document is returned as stored; its turns are never
    /// touched.
    pub async fn ensure_conversation(&self, conversation_id: &str) -> Result<ConversationDocument> {
        let fresh = ConversationDocument::new(conversation_id);
        let body = serde_json::to_value(&fresh)?;

        let created = match self.backend.create_item(conversation_id, &body).await? {
            CreateOutcome::Created(_) => true,
            CreateOutcome::AlreadyExists => false,
        };

        LogEvent::ConversationEnsured {
            conversation_id: conversation_id.to_owned(),
            created,
        }
        .emit();

        if created {
            return Ok(fresh);
        }
        self.get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_owned()))
    }

    /// Load a conversation, or `None` if it has never been created.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationDocument>> {
        match self
            .backend
            .read_item(conversation_id, conversation_id)
            .await?
        {
            Some(item) => Ok(Some(serde_json::from_value(item.body)?)),
            None => Ok(None),
        }
    }

    /// Append a finished turn, assigning it the next turn id.
    ///
    /// Fails with [`Error::ConversationNotFound`] if the conversation was
    /// never created or disappears before the write lands, and with [`Error::StoreConflict`] once the retry budget
    /// is spent.
    pub async fn append_turn(&self, conversation_id: &str, draft: TurnDraft) -> Result<TurnRecord> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let item = self
                .backend
                .read_item(conversation_id, conversation_id)
                .await?
                .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_owned()))?;
            let mut doc: ConversationDocument = serde_json::from_value(item.body)?;

            let record = draft.clone().assign(format_turn_id(doc.next_sequence()));
            doc.turns.push(record.clone());
            let body = serde_json::to_value(&doc)?;

            match self
                .backend
                .replace_item(conversation_id, &body, &item.etag)
                .await
            {
                Ok(ReplaceOutcome::NotFound) => {
                    return Err(Error::ConversationNotFound(conversation_id.to_owned()));
                }
                Ok(ReplaceOutcome::Replaced(_)) => {
                    LogEvent::TurnAppended {
                        conversation_id: conversation_id.to_owned(),
                        turn_id: record.turn_id.clone(),
                        attempts: attempt,
                    }
                    .emit();
                    return Ok(record);
                }
                Err(Error::StoreConflict { .. }) if attempt <= self.max_conflict_retries => {
                    LogEvent::TurnConflictRetry {
                        conversation_id: conversation_id.to_owned(),
                        attempt,
                    }
                    .emit();
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(Error::StoreConflict { id, .. }) => {
                    return Err(Error::StoreConflict {
                        id,
                        reason: format!("gave up after {attempt} attempts"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Highest existing turn id plus one; `"1"` for an empty or unknown
    /// conversation.
    ///
    /// Advisory: [`ConversationStore::append_turn`] derives the id it commits
    /// under its own etag guard.
    pub async fn next_turn_id(&self, conversation_id: &str) -> Result<String> {
        let docs = self
            .backend
            .query_items(
                &ItemQuery::conversation(conversation_id),
                self.cross_partition_queries,
            )
            .await?;

        let max = docs
            .iter()
            .filter_map(|d| d.get("turns").and_then(|t| t.as_array()))
            .flatten()
            .filter_map(|t| t.get("turnId").and_then(|v| v.as_str()))
            .filter_map(parse_turn_id)
            .max()
            .unwrap_or(0);
        Ok(format_turn_id(max + 1))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // Random jitter keeps writers that lost the same race from retrying
        // in lockstep.
        let fraction: f64 = rand::random();
        self.base_delay(attempt).mul_f64(1.0 + JITTER * fraction)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
