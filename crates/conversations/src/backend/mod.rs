//! Keyed JSON document storage.
//!
//! A [`DocumentStore`] holds JSON bodies addressed by `(id, partition key)`,
//! hands out an opaque etag per stored version, and supports conditional
//! replace against that etag. Backends: process memory, local files, and
//! Azure Cosmos DB over REST.

mod cosmos;
mod file;
mod memory;

pub use cosmos::CosmosDocumentStore;
pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;

use std::sync::Arc;

use serde_json::Value;

use ct_domain::config::{StoreBackend, StoreConfig};
use ct_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A document body together with the version tag it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub body: Value,
    pub etag: String,
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The item was written; carries its new etag.
    Created(String),
    /// An item with the same id already existed and was left untouched.
    AlreadyExists,
}

/// Result of a conditional replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The item was overwritten; carries its new etag.
    Replaced(String),
    /// No item with that id exists in the partition.
    NotFound,
}

/// Equality filters over top-level fields.
///
/// Rendered as Cosmos SQL for the REST backend and evaluated directly by the
/// local backends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemQuery {
    filters: Vec<(String, Value)>,
    partition_key: Option<String>,
}

impl ItemQuery {
    /// Every document whose `conversationId` equals `conversation_id`.
    pub fn conversation(conversation_id: &str) -> Self {
        Self::default()
            .field_eq(crate::document::PARTITION_FIELD, conversation_id)
            .in_partition(conversation_id)
    }

    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Hint that all matches live in one partition.
    pub fn in_partition(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    /// Parameterized SQL text and its `@name` parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT * FROM c");
        let mut params = Vec::with_capacity(self.filters.len());
        for (i, (field, value)) in self.filters.iter().enumerate() {
            let name = format!("@{}", param_name(field));
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("{} = {name}", field_path(field)));
            params.push(serde_json::json!({"name": name, "value": value}));
        }
        (sql, params)
    }

    /// True when `body` satisfies every filter.
    pub fn matches(&self, body: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| body.get(field) == Some(value))
    }
}

fn field_path(field: &str) -> String {
    let plain = field.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("c.{field}")
    } else {
        format!("c[\"{}\"]", field.replace('"', "\\\""))
    }
}

fn param_name(field: &str) -> String {
    field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The `id` attribute every stored body must carry.
pub(crate) fn item_id(body: &Value) -> Result<&str> {
    body.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Other("document body has no string 'id'".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A document database, treated as an external keyed store.
///
/// Transport or backend failures surface as [`Error::StoreUnavailable`];
/// a lost conditional write surfaces as [`Error::StoreConflict`]. A missing
/// item is never an error at this layer: reads return `None` and replaces
/// return [`ReplaceOutcome::NotFound`].
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &'static str;

    async fn create_database_if_absent(&self) -> Result<()>;

    async fn create_container_if_absent(&self, partition_key_path: &str) -> Result<()>;

    /// Write `body` only if no item with its id exists in the partition.
    async fn create_item(&self, partition_key: &str, body: &Value) -> Result<CreateOutcome>;

    /// Unconditional create-or-overwrite. Returns the new etag.
    async fn upsert_item(&self, partition_key: &str, body: &Value) -> Result<String>;

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<StoredItem>>;

    /// Overwrite an existing item only if its current etag equals `if_match`.
    async fn replace_item(
        &self,
        partition_key: &str,
        body: &Value,
        if_match: &str,
    ) -> Result<ReplaceOutcome>;

    async fn query_items(&self, query: &ItemQuery, cross_partition: bool) -> Result<Vec<Value>>;
}

/// Build the backend selected by `cfg.backend`.
pub fn create_document_store(cfg: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match cfg.backend {
        StoreBackend::Memory => Arc::new(MemoryDocumentStore::new()),
        StoreBackend::File => Arc::new(FileDocumentStore::new(&cfg.file.path)?),
        StoreBackend::Cosmos => Arc::new(CosmosDocumentStore::from_config(&cfg.cosmos)?),
    };
    tracing::info!(backend = store.name(), "document store ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_query_renders_parameterized_sql() {
        let q = ItemQuery::conversation("conv-001");
        let (sql, params) = q.to_sql();
        assert_eq!(sql, "SELECT * FROM c WHERE c.conversationId = @conversationId");
        assert_eq!(
            params,
            vec![serde_json::json!({"name": "@conversationId", "value": "conv-001"})]
        );
        assert_eq!(q.partition_key(), Some("conv-001"));
    }

    #[test]
    fn multiple_filters_are_anded() {
        let q = ItemQuery::default()
            .field_eq("conversationId", "c")
            .field_eq("turnId", "2");
        let (sql, params) = q.to_sql();
        assert!(sql.ends_with("c.conversationId = @conversationId AND c.turnId = @turnId"));
        assert_eq!(params.len(), 2);

        let (sql, _) = ItemQuery::default().field_eq("app-id", 1).to_sql();
        assert_eq!(sql, "SELECT * FROM c WHERE c[\"app-id\"] = @app_id");
    }

    #[test]
    fn matches_compares_top_level_fields() {
        let q = ItemQuery::conversation("c");
        assert!(q.matches(&serde_json::json!({"id": "c", "conversationId": "c"})));
        assert!(!q.matches(&serde_json::json!({"id": "d", "conversationId": "d"})));
        assert!(!q.matches(&serde_json::json!({"id": "c"})));
    }

    #[test]
    fn item_id_requires_a_string() {
        assert_eq!(item_id(&serde_json::json!({"id": "x"})).unwrap(), "x");
        assert!(item_id(&serde_json::json!({"id": 3})).is_err());
        assert!(item_id(&serde_json::json!({})).is_err());
    }
}
