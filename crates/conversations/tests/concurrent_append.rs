//! Writers racing on one conversation: both land with distinct ids, and a
//! conversation removed mid-append is reported as missing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use ct_conversations::backend::{
    CreateOutcome, DocumentStore, ItemQuery, MemoryDocumentStore, ReplaceOutcome, StoredItem,
};
use ct_conversations::ConversationStore;
use ct_domain::clock::FixedClock;
use ct_domain::config::StoreConfig;
use ct_domain::error::{Error, Result};
use ct_domain::stream::{Accumulated, UsageSummary};
use ct_domain::turn::{ModelOrigin, TurnDraft};

/// Wraps a store and, on the first `n` replaces, lets a competing writer
/// append through `rival` first so the caller's etag goes stale.
struct RacingStore {
    inner: Arc<MemoryDocumentStore>,
    rival: parking_lot::Mutex<Option<Arc<ConversationStore>>>,
    races_left: AtomicUsize,
    replaces: AtomicUsize,
}

impl RacingStore {
    fn new(inner: Arc<MemoryDocumentStore>, races: usize) -> Self {
        Self {
            inner,
            rival: parking_lot::Mutex::new(None),
            races_left: AtomicUsize::new(races),
            replaces: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for RacingStore {
    fn name(&self) -> &'static str {
        "racing"
    }

    async fn create_database_if_absent(&self) -> Result<()> {
        self.inner.create_database_if_absent().await
    }

    async fn create_container_if_absent(&self, partition_key_path: &str) -> Result<()> {
        self.inner.create_container_if_absent(partition_key_path).await
    }

    async fn create_item(&self, partition_key: &str, body: &Value) -> Result<CreateOutcome> {
        self.inner.create_item(partition_key, body).await
    }

    async fn upsert_item(&self, partition_key: &str, body: &Value) -> Result<String> {
        self.inner.upsert_item(partition_key, body).await
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<StoredItem>> {
        self.inner.read_item(id, partition_key).await
    }

    async fn replace_item(
        &self,
        partition_key: &str,
        body: &Value,
        if_match: &str,
    ) -> Result<ReplaceOutcome> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        let race = self
            .races_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if race {
            let rival = self.rival.lock().clone();
            if let Some(rival) = rival {
                rival.append_turn(partition_key, draft("rival")).await?;
            }
        }
        self.inner.replace_item(partition_key, body, if_match).await
    }

    async fn query_items(&self, query: &ItemQuery, cross_partition: bool) -> Result<Vec<Value>> {
        self.inner.query_items(query, cross_partition).await
    }
}

/// Reads see `seen`; writes go to `target`, which never holds the document.
/// Models a conversation deleted between the read and the conditional write.
struct VanishingStore {
    seen: MemoryDocumentStore,
    target: MemoryDocumentStore,
}

#[async_trait]
impl DocumentStore for VanishingStore {
    fn name(&self) -> &'static str {
        "vanishing"
    }

    async fn create_database_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn create_container_if_absent(&self, _partition_key_path: &str) -> Result<()> {
        Ok(())
    }

    async fn create_item(&self, partition_key: &str, body: &Value) -> Result<CreateOutcome> {
        self.seen.create_item(partition_key, body).await
    }

    async fn upsert_item(&self, partition_key: &str, body: &Value) -> Result<String> {
        self.target.upsert_item(partition_key, body).await
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<StoredItem>> {
        self.seen.read_item(id, partition_key).await
    }

    async fn replace_item(
        &self,
        partition_key: &str,
        body: &Value,
        if_match: &str,
    ) -> Result<ReplaceOutcome> {
        self.target.replace_item(partition_key, body, if_match).await
    }

    async fn query_items(&self, query: &ItemQuery, cross_partition: bool) -> Result<Vec<Value>> {
        self.seen.query_items(query, cross_partition).await
    }
}

fn draft(input: &str) -> TurnDraft {
    TurnDraft::new(
        input,
        Accumulated {
            text: format!("answer to {input}"),
            usage: UsageSummary::new(3, 4, 7),
        },
        Vec::new(),
        &ModelOrigin::new("azure-openai", "gpt-4o-mini"),
        &FixedClock(1_700_000_000),
    )
}

fn cfg(retries: u32) -> StoreConfig {
    StoreConfig {
        max_conflict_retries: retries,
        conflict_backoff_ms: 1,
        ..StoreConfig::default()
    }
}

#[tokio::test]
async fn losing_writer_retries_and_takes_next_id() {
    let shared = Arc::new(MemoryDocumentStore::new());
    let racing = Arc::new(RacingStore::new(Arc::clone(&shared), 1));
    *racing.rival.lock() = Some(Arc::new(ConversationStore::new(shared.clone(), &cfg(5))));

    let store = ConversationStore::new(racing.clone(), &cfg(5));
    store.ensure_conversation("conv-001").await.unwrap();

    let mine = store.append_turn("conv-001", draft("mine")).await.unwrap();
    assert_eq!(mine.turn_id, "2");
    assert_eq!(racing.replaces.load(Ordering::SeqCst), 2);

    let doc = store.get_conversation("conv-001").await.unwrap().unwrap();
    let turns: Vec<_> = doc
        .turns
        .iter()
        .map(|t| (t.turn_id.as_str(), t.input.as_str()))
        .collect();
    assert_eq!(turns, vec![("1", "rival"), ("2", "mine")]);
}

#[tokio::test]
async fn exhausted_retries_surface_conflict_and_keep_rival_turns() {
    let shared = Arc::new(MemoryDocumentStore::new());
    let racing = Arc::new(RacingStore::new(Arc::clone(&shared), usize::MAX));
    *racing.rival.lock() = Some(Arc::new(ConversationStore::new(shared.clone(), &cfg(5))));

    let store = ConversationStore::new(racing.clone(), &cfg(2));
    store.ensure_conversation("conv-002").await.unwrap();

    let err = store.append_turn("conv-002", draft("mine")).await.unwrap_err();
    assert!(matches!(err, Error::StoreConflict { .. }), "got {err:?}");
    assert_eq!(racing.replaces.load(Ordering::SeqCst), 3);

    let doc = store.get_conversation("conv-002").await.unwrap().unwrap();
    assert_eq!(doc.turns.len(), 3);
    assert!(doc.turns.iter().all(|t| t.input == "rival"));
}

#[tokio::test]
async fn conversation_removed_mid_append_is_not_found() {
    let store = ConversationStore::new(
        Arc::new(VanishingStore {
            seen: MemoryDocumentStore::new(),
            target: MemoryDocumentStore::new(),
        }),
        &cfg(5),
    );
    store.ensure_conversation("c").await.unwrap();

    let err = store.append_turn("c", draft("late")).await.unwrap_err();
    assert!(
        matches!(&err, Error::ConversationNotFound(id) if id == "c"),
        "got {err:?}"
    );
}
