//! One JSON file per item under a directory.
//!
//! File names are `hex(sha256(partition_key \0 id)).json` so arbitrary ids
//! are safe on disk. Each file holds `{etag, partitionKey, body}`. Writes go
//! through a temp file and rename, under a process-wide lock so the etag
//! check and the write are atomic with respect to other writers in this
//! process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use ct_domain::error::{Error, Result};

use super::{item_id, CreateOutcome, DocumentStore, ItemQuery, ReplaceOutcome, StoredItem};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    etag: String,
    partition_key: String,
    body: Value,
}

pub struct FileDocumentStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileDocumentStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::StoreUnavailable(format!("creating {}: {e}", dir.display()))
        })?;
        tracing::info!(path = %dir.display(), "file document store opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn path_for(&self, id: &str, partition_key: &str) -> PathBuf {
        item_path(&self.dir, id, partition_key)
    }

    /// Run blocking file I/O off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Mutex<()>) -> Result<T> + Send + 'static,
    {
        let dir = self.dir.clone();
        let lock = Arc::clone(&self.write_lock);
        tokio::task::spawn_blocking(move || f(dir.as_path(), lock.as_ref()))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
    }
}

fn item_path(dir: &Path, id: &str, partition_key: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(partition_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(id.as_bytes());
    dir.join(format!("{}.json", hex::encode(hasher.finalize())))
}

fn io_err(path: &Path, e: std::io::Error) -> Error {
    Error::StoreUnavailable(format!("{}: {e}", path.display()))
}

fn read_envelope(path: &Path) -> Result<Option<Envelope>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

fn write_envelope(path: &Path, partition_key: &str, body: &Value) -> Result<String> {
    let etag = format!("\"{}\"", uuid::Uuid::new_v4());
    let envelope = Envelope {
        etag: etag.clone(),
        partition_key: partition_key.to_owned(),
        body: body.clone(),
    };
    let json = serde_json::to_string_pretty(&envelope)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(etag)
}

#[async_trait::async_trait]
impl DocumentStore for FileDocumentStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn create_database_if_absent(&self) -> Result<()> {
        Ok(())
    }

    async fn create_container_if_absent(&self, _partition_key_path: &str) -> Result<()> {
        Ok(())
    }

    async fn create_item(&self, partition_key: &str, body: &Value) -> Result<CreateOutcome> {
        let path = self.path_for(item_id(body)?, partition_key);
        let pk = partition_key.to_owned();
        let body = body.clone();
        self.blocking(move |_, lock| {
            let _guard = lock.lock();
            if path.exists() {
                return Ok(CreateOutcome::AlreadyExists);
            }
            write_envelope(&path, &pk, &body).map(CreateOutcome::Created)
        })
        .await
    }

    async fn upsert_item(&self, partition_key: &str, body: &Value) -> Result<String> {
        let path = self.path_for(item_id(body)?, partition_key);
        let pk = partition_key.to_owned();
        let body = body.clone();
        self.blocking(move |_, lock| {
            let _guard = lock.lock();
            write_envelope(&path, &pk, &body)
        })
        .await
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<StoredItem>> {
        let path = self.path_for(id, partition_key);
        self.blocking(move |_, _| {
            Ok(read_envelope(&path)?.map(|env| StoredItem {
                body: env.body,
                etag: env.etag,
            }))
        })
        .await
    }

    async fn replace_item(
        &self,
        partition_key: &str,
        body: &Value,
        if_match: &str,
    ) -> Result<ReplaceOutcome> {
        let id = item_id(body)?.to_owned();
        let path = self.path_for(&id, partition_key);
        let pk = partition_key.to_owned();
        let body = body.clone();
        let if_match = if_match.to_owned();
        self.blocking(move |_, lock| {
            let _guard = lock.lock();
            let Some(current) = read_envelope(&path)? else {
                return Ok(ReplaceOutcome::NotFound);
            };
            if current.etag != if_match {
                return Err(Error::StoreConflict {
                    id,
                    reason: "etag mismatch".into(),
                });
            }
            write_envelope(&path, &pk, &body).map(ReplaceOutcome::Replaced)
        })
        .await
    }

    async fn query_items(&self, query: &ItemQuery, cross_partition: bool) -> Result<Vec<Value>> {
        let query = query.clone();
        self.blocking(move |dir, _| {
            let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
            let mut hits: Vec<(String, String, Value)> = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| io_err(dir, e))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(env) = read_envelope(&path)? else {
                    continue;
                };
                let in_scope = cross_partition
                    || query
                        .partition_key()
                        .map_or(true, |want| want == env.partition_key);
                if in_scope && query.matches(&env.body) {
                    let id = item_id(&env.body).unwrap_or_default().to_owned();
                    hits.push((env.partition_key, id, env.body));
                }
            }
            hits.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
            Ok(hits.into_iter().map(|(_, _, body)| body).collect())
        })
        .await
    }
}
