//! Read path for the one-document-per-turn layout.
//!
//! Older deployments wrote each turn as its own document, keyed
//! `"{conversationId}:{turnId}"` with turn ids like `"001"`. This module
//! reads those documents in turn order and folds them into the aggregate
//! conversation document. Flat documents are left in place.

use std::cmp::Ordering;

use serde_json::Value;

use ct_domain::error::{Error, Result};
use ct_domain::log::LogEvent;
use ct_domain::turn::{format_turn_id, TurnRecord};

use crate::backend::{DocumentStore, ItemQuery, ReplaceOutcome};
use crate::document::{ConversationDocument, FlatTurnDocument, PARTITION_FIELD};
use crate::store::ConversationStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub conversation_id: String,
    /// Flat turns copied into the aggregate.
    pub imported: usize,
    /// The aggregate already had turns, so nothing was copied.
    pub skipped: bool,
}

/// Write one turn as a standalone flat document (upsert).
pub async fn put_flat_turn(
    backend: &dyn DocumentStore,
    conversation_id: &str,
    turn: TurnRecord,
) -> Result<FlatTurnDocument> {
    let doc = FlatTurnDocument::new(conversation_id, turn);
    backend
        .upsert_item(conversation_id, &serde_json::to_value(&doc)?)
        .await?;
    Ok(doc)
}

/// All flat turn documents of a conversation, ordered by numeric turn id and
/// then timestamp. Aggregate documents in the same partition are ignored.
pub async fn read_flat_turns(
    backend: &dyn DocumentStore,
    conversation_id: &str,
    cross_partition: bool,
) -> Result<Vec<FlatTurnDocument>> {
    let docs = backend
        .query_items(&ItemQuery::conversation(conversation_id), cross_partition)
        .await?;

    let mut flat: Vec<FlatTurnDocument> = docs
        .into_iter()
        .filter(is_flat)
        .map(serde_json::from_value)
        .collect::<std::result::Result<_, _>>()?;
    flat.sort_by(|a, b| turn_order(&a.turn, &b.turn));
    Ok(flat)
}

/// Flat-layout counterpart of [`ConversationStore::next_turn_id`]: the
/// highest numeric flat turn id plus one, `"1"` when there are none.
///
/// Not guarded against concurrent writers; callers own the counter.
pub async fn next_flat_turn_id(
    backend: &dyn DocumentStore,
    conversation_id: &str,
    cross_partition: bool,
) -> Result<String> {
    let max = read_flat_turns(backend, conversation_id, cross_partition)
        .await?
        .iter()
        .filter_map(|f| f.turn.sequence())
        .max()
        .unwrap_or(0);
    Ok(format_turn_id(max + 1))
}

fn is_flat(doc: &Value) -> bool {
    doc.get("turnId").is_some() && doc.get("turns").is_none() && doc.get(PARTITION_FIELD).is_some()
}

fn turn_order(a: &TurnRecord, b: &TurnRecord) -> Ordering {
    // Non-numeric ids sort after numeric ones.
    match (a.sequence(), b.sequence()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.turn_id.cmp(&b.turn_id),
    }
    .then(a.timestamp.cmp(&b.timestamp))
}

/// Fold a conversation's flat turns into its aggregate document.
///
/// The aggregate is created if absent. Turns are renumbered `1..=N` in flat
/// order. An aggregate that already holds turns is left alone and the
/// report says `skipped`.
pub async fn import_flat_turns(
    store: &ConversationStore,
    conversation_id: &str,
    cross_partition: bool,
) -> Result<ImportReport> {
    let backend = store.backend().as_ref();
    let flat = read_flat_turns(backend, conversation_id, cross_partition).await?;

    let mut report = ImportReport {
        conversation_id: conversation_id.to_owned(),
        imported: 0,
        skipped: false,
    };
    if flat.is_empty() {
        return Ok(report);
    }

    store.ensure_conversation(conversation_id).await?;
    let item = backend
        .read_item(conversation_id, conversation_id)
        .await?
        .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_owned()))?;
    let mut doc: ConversationDocument = serde_json::from_value(item.body)?;
    if !doc.turns.is_empty() {
        report.skipped = true;
        tracing::info!(
            conversation_id,
            existing = doc.turns.len(),
            "aggregate already populated; flat turns not imported"
        );
        return Ok(report);
    }

    doc.turns = flat
        .into_iter()
        .enumerate()
        .map(|(i, f)| TurnRecord {
            turn_id: format_turn_id(i as u64 + 1),
            ..f.turn
        })
        .collect();
    report.imported = doc.turns.len();

    let outcome = backend
        .replace_item(conversation_id, &serde_json::to_value(&doc)?, &item.etag)
        .await?;
    if outcome == ReplaceOutcome::NotFound {
        return Err(Error::ConversationNotFound(conversation_id.to_owned()));
    }

    LogEvent::FlatTurnsImported {
        conversation_id: conversation_id.to_owned(),
        imported: report.imported,
    }
    .emit();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use ct_domain::config::StoreConfig;
    use ct_domain::stream::UsageSummary;
    use std::sync::Arc;

    fn turn(id: &str, ts: i64, input: &str) -> TurnRecord {
        TurnRecord {
            turn_id: id.into(),
            input: input.into(),
            output: format!("out {input}"),
            tokens: UsageSummary::default(),
            trace: Vec::new(),
            timestamp: ts,
            provider: "azure-openai".into(),
            model: "gpt-4o-mini".into(),
        }
    }

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(MemoryDocumentStore::new()), &StoreConfig::default())
    }

    #[tokio::test]
    async fn flat_turns_are_read_in_numeric_order() {
        let s = store();
        let b = s.backend().as_ref();
        put_flat_turn(b, "conv-001", turn("010", 3, "ten")).await.unwrap();
        put_flat_turn(b, "conv-001", turn("002", 2, "two")).await.unwrap();
        put_flat_turn(b, "conv-001", turn("001", 1, "one")).await.unwrap();
        put_flat_turn(b, "other", turn("001", 1, "elsewhere")).await.unwrap();

        let flat = read_flat_turns(b, "conv-001", true).await.unwrap();
        let inputs: Vec<_> = flat.iter().map(|f| f.turn.input.as_str()).collect();
        assert_eq!(inputs, vec!["one", "two", "ten"]);
        assert_eq!(flat[0].id, "conv-001:001");
        assert_eq!(next_flat_turn_id(b, "conv-001", true).await.unwrap(), "11");
        assert_eq!(next_flat_turn_id(b, "nobody", true).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn import_renumbers_into_new_aggregate() {
        let s = store();
        let b = s.backend().as_ref();
        put_flat_turn(b, "conv-001", turn("001", 1, "one")).await.unwrap();
        put_flat_turn(b, "conv-001", turn("002", 2, "two")).await.unwrap();

        let report = import_flat_turns(&s, "conv-001", true).await.unwrap();
        assert_eq!(report.imported, 2);
        assert!(!report.skipped);

        let doc = s.get_conversation("conv-001").await.unwrap().unwrap();
        let ids: Vec<_> = doc.turns.iter().map(|t| t.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(doc.turns[1].input, "two");
        assert_eq!(s.next_turn_id("conv-001").await.unwrap(), "3");
    }

    #[tokio::test]
    async fn populated_aggregate_is_skipped() {
        let s = store();
        let b = s.backend().as_ref();
        put_flat_turn(b, "c", turn("001", 1, "flat")).await.unwrap();
        import_flat_turns(&s, "c", true).await.unwrap();

        let again = import_flat_turns(&s, "c", true).await.unwrap();
        assert!(again.skipped);
        assert_eq!(again.imported, 0);
        assert_eq!(s.get_conversation("c").await.unwrap().unwrap().turns.len(), 1);
    }

    #[tokio::test]
    async fn nothing_to_import_creates_nothing() {
        let s = store();
        let report = import_flat_turns(&s, "empty", true).await.unwrap();
        assert_eq!(report.imported, 0);
        assert!(s.get_conversation("empty").await.unwrap().is_none());
    }
}
