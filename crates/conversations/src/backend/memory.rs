use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use ct_domain::error::{Error, Result};

use super::{item_id, CreateOutcome, DocumentStore, ItemQuery, ReplaceOutcome, StoredItem};

/// Process-local document store. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryDocumentStore {
    items: RwLock<HashMap<(String, String), StoredItem>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

fn new_etag() -> String {
    format!("\"{}\"", uuid::Uuid::new_v4())
}

fn key(id: &str, partition_key: &str) -> (String, String) {
    (partition_key.to_owned(), id.to_owned())
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_database_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn create_container_if_absent(&self, _partition_key_path: &str) -> Result<()> {
        Ok(())
    }

    async fn create_item(&self, partition_key: &str, body: &Value) -> Result<CreateOutcome> {
        let k = key(item_id(body)?, partition_key);
        let mut items = self.items.write();
        if items.contains_key(&k) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let etag = new_etag();
        items.insert(
            k,
            StoredItem {
                body: body.clone(),
                etag: etag.clone(),
            },
        );
        Ok(CreateOutcome::Created(etag))
    }

    async fn upsert_item(&self, partition_key: &str, body: &Value) -> Result<String> {
        let k = key(item_id(body)?, partition_key);
        let etag = new_etag();
        self.items.write().insert(
            k,
            StoredItem {
                body: body.clone(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<StoredItem>> {
        Ok(self.items.read().get(&key(id, partition_key)).cloned())
    }

    async fn replace_item(
        &self,
        partition_key: &str,
        body: &Value,
        if_match: &str,
    ) -> Result<ReplaceOutcome> {
        let id = item_id(body)?;
        let mut items = self.items.write();
        let Some(current) = items.get_mut(&key(id, partition_key)) else {
            return Ok(ReplaceOutcome::NotFound);
        };
        if current.etag != if_match {
            return Err(Error::StoreConflict {
                id: id.to_owned(),
                reason: "etag mismatch".into(),
            });
        }
        let etag = new_etag();
        current.body = body.clone();
        current.etag = etag.clone();
        Ok(ReplaceOutcome::Replaced(etag))
    }

    async fn query_items(&self, query: &ItemQuery, cross_partition: bool) -> Result<Vec<Value>> {
        let items = self.items.read();
        let mut out: Vec<(&(String, String), &StoredItem)> = items
            .iter()
            .filter(|((pk, _), _)| {
                cross_partition || query.partition_key().map_or(true, |want| want == pk.as_str())
            })
            .filter(|(_, item)| query.matches(&item.body))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        Ok(out.into_iter().map(|(_, item)| item.body.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_is_create_if_absent() {
        let store = MemoryDocumentStore::new();
        let first = store.create_item("c", &json!({"id": "c", "n": 1})).await.unwrap();
        assert!(matches!(first, CreateOutcome::Created(_)));

        let second = store.create_item("c", &json!({"id": "c", "n": 2})).await.unwrap();
        assert_eq!(second, CreateOutcome::AlreadyExists);

        let item = store.read_item("c", "c").await.unwrap().unwrap();
        assert_eq!(item.body["n"], 1);
    }

    #[tokio::test]
    async fn replace_checks_etag() {
        let store = MemoryDocumentStore::new();
        store.create_item("c", &json!({"id": "c"})).await.unwrap();
        let read = store.read_item("c", "c").await.unwrap().unwrap();

        let ReplaceOutcome::Replaced(new_etag) = store
            .replace_item("c", &json!({"id": "c", "v": 2}), &read.etag)
            .await
            .unwrap()
        else {
            panic!("item should exist");
        };
        assert_ne!(new_etag, read.etag);

        let stale = store
            .replace_item("c", &json!({"id": "c", "v": 3}), &read.etag)
            .await;
        assert!(matches!(stale, Err(Error::StoreConflict { .. })));
        assert_eq!(store.read_item("c", "c").await.unwrap().unwrap().body["v"], 2);
    }

    #[tokio::test]
    async fn replace_of_missing_item_is_not_found() {
        let store = MemoryDocumentStore::new();
        let out = store
            .replace_item("c", &json!({"id": "c"}), "any")
            .await
            .unwrap();
        assert_eq!(out, ReplaceOutcome::NotFound);
        assert!(store.read_item("c", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn items_are_scoped_by_partition() {
        let store = MemoryDocumentStore::new();
        store.upsert_item("a", &json!({"id": "x", "conversationId": "a"})).await.unwrap();
        store.upsert_item("b", &json!({"id": "x", "conversationId": "b"})).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.read_item("x", "c").await.unwrap().is_none());

        let hits = store
            .query_items(&ItemQuery::conversation("a"), false)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["conversationId"], "a");
    }
}
