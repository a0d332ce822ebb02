//! Azure Cosmos DB (SQL API) over its REST interface.
//!
//! Requests are signed with the account master key:
//! `HMAC-SHA256(base64-decoded key, "{verb}\n{resourceType}\n{resourceLink}\n{date}\n\n")`
//! with verb, resource type and date lowercased, sent URL-encoded as
//! `type=master&ver=1.0&sig={base64 signature}`.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use sha2::Sha256;

use ct_domain::config::{AuthConfig, CosmosConfig};
use ct_domain::error::{Error, Result};

use super::{item_id, CreateOutcome, DocumentStore, ItemQuery, ReplaceOutcome, StoredItem};

const API_VERSION: &str = "2018-12-31";

type HmacSha256 = Hmac<Sha256>;

/// Status, headers and body text of one response.
type Reply = (StatusCode, HeaderMap, String);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request signing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the URL-encoded `authorization` header value.
pub(crate) fn master_key_token(
    key: &[u8],
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> Result<String> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("invalid Cosmos key: {e}")))?;
    mac.update(payload.as_bytes());
    let sig = BASE64.encode(mac.finalize().into_bytes());
    Ok(urlencoding::encode(&format!("type=master&ver=1.0&sig={sig}")).into_owned())
}

/// RFC 1123 date in GMT, as `x-ms-date` expects.
fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn partition_header(partition_key: &str) -> String {
    Value::Array(vec![Value::String(partition_key.to_owned())]).to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CosmosDocumentStore {
    endpoint: String,
    key: Vec<u8>,
    database: String,
    container: String,
    offer_throughput: u32,
    client: reqwest::Client,
}

/// One signed request: method, URL path, resource type and the link used
/// in the signature.
struct Resource {
    path: String,
    resource_type: &'static str,
    link: String,
}

impl CosmosDocumentStore {
    pub fn from_config(cfg: &CosmosConfig) -> Result<Self> {
        let mut missing = Vec::new();
        let endpoint = non_blank(&cfg.endpoint);
        let database = non_blank(&cfg.database);
        let container = non_blank(&cfg.container);
        let key = resolve_key(&cfg.auth);
        if endpoint.is_none() {
            missing.push("COSMOS_URL (store.cosmos.endpoint)".to_string());
        }
        if key.is_none() {
            missing.push(
                cfg.auth
                    .env
                    .clone()
                    .unwrap_or_else(|| "store.cosmos.auth.key".into()),
            );
        }
        if database.is_none() {
            missing.push("COSMOS_DB (store.cosmos.database)".to_string());
        }
        if container.is_none() {
            missing.push("COSMOS_CONTAINER (store.cosmos.container)".to_string());
        }
        match (endpoint, key, database, container) {
            (Some(endpoint), Some(key), Some(database), Some(container)) => Self::new(
                endpoint,
                &key,
                database,
                container,
                cfg.offer_throughput,
                Duration::from_millis(cfg.timeout_ms),
            ),
            _ => Err(Error::ConfigMissing(missing)),
        }
    }

    /// `key` is the base64 master key as shown in the portal.
    pub fn new(
        endpoint: &str,
        key: &str,
        database: &str,
        container: &str,
        offer_throughput: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let key = BASE64
            .decode(key.trim())
            .map_err(|e| Error::Auth(format!("Cosmos key is not valid base64: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key,
            database: database.to_string(),
            container: container.to_string(),
            offer_throughput,
            client,
        })
    }

    fn db_link(&self) -> String {
        format!("dbs/{}", self.database)
    }

    fn coll_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.container)
    }

    fn docs(&self) -> Resource {
        Resource {
            path: format!("{}/docs", self.coll_link()),
            resource_type: "docs",
            link: self.coll_link(),
        }
    }

    fn doc(&self, id: &str) -> Resource {
        let link = format!("{}/docs/{}", self.coll_link(), id);
        Resource {
            path: format!("{}/docs/{}", self.coll_link(), urlencoding::encode(id)),
            resource_type: "docs",
            link,
        }
    }

    fn request(&self, method: Method, res: &Resource) -> Result<reqwest::RequestBuilder> {
        let date = http_date();
        let token = master_key_token(
            &self.key,
            method.as_str(),
            res.resource_type,
            &res.link,
            &date,
        )?;
        Ok(self
            .client
            .request(method, format!("{}/{}", self.endpoint, res.path))
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("accept", "application/json"))
    }

    async fn send(&self, op: &str, builder: reqwest::RequestBuilder) -> Result<Reply> {
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("cosmos {op}: {e}")))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("cosmos {op}: {e}")))?;
        tracing::debug!(op, status = status.as_u16(), "cosmos request");
        Ok((status, headers, text))
    }

    /// POST a create; `409 Conflict` means the resource already exists.
    async fn create_if_absent(
        &self,
        op: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Option<(HeaderMap, String)>> {
        let (status, headers, text) = self.send(op, builder).await?;
        match status {
            s if s.is_success() => Ok(Some((headers, text))),
            StatusCode::CONFLICT => Ok(None),
            s => Err(unexpected(op, s, &text)),
        }
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_key(auth: &AuthConfig) -> Option<String> {
    auth.key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| auth.env.as_deref().and_then(|v| std::env::var(v).ok()))
        .filter(|k| !k.is_empty())
}

fn unexpected(op: &str, status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect());
    Error::StoreUnavailable(format!("cosmos {op}: HTTP {} - {message}", status.as_u16()))
}

fn etag_of(headers: &HeaderMap, body: &str) -> String {
    headers
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| {
            serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("_etag").and_then(Value::as_str).map(String::from))
        })
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl DocumentStore for CosmosDocumentStore {
    fn name(&self) -> &'static str {
        "cosmos"
    }

    async fn create_database_if_absent(&self) -> Result<()> {
        let res = Resource {
            path: "dbs".into(),
            resource_type: "dbs",
            link: String::new(),
        };
        let builder = self
            .request(Method::POST, &res)?
            .json(&serde_json::json!({"id": self.database}));
        let created = self.create_if_absent("create database", builder).await?;
        tracing::info!(database = %self.database, created = created.is_some(), "cosmos database ready");
        Ok(())
    }

    async fn create_container_if_absent(&self, partition_key_path: &str) -> Result<()> {
        let res = Resource {
            path: format!("{}/colls", self.db_link()),
            resource_type: "colls",
            link: self.db_link(),
        };
        let builder = self
            .request(Method::POST, &res)?
            .header("x-ms-offer-throughput", self.offer_throughput.to_string())
            .json(&serde_json::json!({
                "id": self.container,
                "partitionKey": {"paths": [partition_key_path], "kind": "Hash"},
            }));
        let created = self.create_if_absent("create container", builder).await?;
        tracing::info!(
            container = %self.container,
            partition_key = partition_key_path,
            created = created.is_some(),
            "cosmos container ready"
        );
        Ok(())
    }

    async fn create_item(&self, partition_key: &str, body: &Value) -> Result<CreateOutcome> {
        item_id(body)?;
        let builder = self
            .request(Method::POST, &self.docs())?
            .header("x-ms-documentdb-partitionkey", partition_header(partition_key))
            .json(body);
        Ok(match self.create_if_absent("create item", builder).await? {
            Some((headers, text)) => CreateOutcome::Created(etag_of(&headers, &text)),
            None => CreateOutcome::AlreadyExists,
        })
    }

    async fn upsert_item(&self, partition_key: &str, body: &Value) -> Result<String> {
        item_id(body)?;
        let builder = self
            .request(Method::POST, &self.docs())?
            .header("x-ms-documentdb-partitionkey", partition_header(partition_key))
            .header("x-ms-documentdb-is-upsert", "True")
            .json(body);
        let (status, headers, text) = self.send("upsert item", builder).await?;
        if !status.is_success() {
            return Err(unexpected("upsert item", status, &text));
        }
        Ok(etag_of(&headers, &text))
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<StoredItem>> {
        let builder = self
            .request(Method::GET, &self.doc(id))?
            .header("x-ms-documentdb-partitionkey", partition_header(partition_key));
        let (status, headers, text) = self.send("read item", builder).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let etag = etag_of(&headers, &text);
                let body: Value = serde_json::from_str(&text)?;
                Ok(Some(StoredItem { body, etag }))
            }
            s => Err(unexpected("read item", s, &text)),
        }
    }

    async fn replace_item(
        &self,
        partition_key: &str,
        body: &Value,
        if_match: &str,
    ) -> Result<ReplaceOutcome> {
        let id = item_id(body)?;
        let builder = self
            .request(Method::PUT, &self.doc(id))?
            .header("x-ms-documentdb-partitionkey", partition_header(partition_key))
            .header("if-match", if_match)
            .json(body);
        let (status, headers, text) = self.send("replace item", builder).await?;
        match status {
            s if s.is_success() => Ok(ReplaceOutcome::Replaced(etag_of(&headers, &text))),
            StatusCode::PRECONDITION_FAILED => Err(Error::StoreConflict {
                id: id.to_owned(),
                reason: "etag mismatch".into(),
            }),
            StatusCode::NOT_FOUND => Ok(ReplaceOutcome::NotFound),
            s => Err(unexpected("replace item", s, &text)),
        }
    }

    async fn query_items(&self, query: &ItemQuery, cross_partition: bool) -> Result<Vec<Value>> {
        let (sql, parameters) = query.to_sql();
        let body = serde_json::json!({"query": sql, "parameters": parameters});
        let mut documents = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut builder = self
                .request(Method::POST, &self.docs())?
                .header("content-type", "application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .body(body.to_string());
            if cross_partition {
                builder = builder.header("x-ms-documentdb-query-enablecrosspartition", "True");
            } else if let Some(pk) = query.partition_key() {
                builder = builder.header("x-ms-documentdb-partitionkey", partition_header(pk));
            }
            if let Some(ref token) = continuation {
                builder = builder.header("x-ms-continuation", token.as_str());
            }

            let (status, headers, text) = self.send("query items", builder).await?;
            if !status.is_success() {
                return Err(unexpected("query items", status, &text));
            }
            let page: Value = serde_json::from_str(&text)?;
            if let Some(Value::Array(docs)) = page.get("Documents") {
                documents.extend(docs.iter().cloned());
            }

            continuation = headers
                .get("x-ms-continuation")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from);
            if continuation.is_none() {
                break;
            }
        }

        Ok(documents)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM="; // "secret-key-for-tests"

    fn store(url: &str) -> CosmosDocumentStore {
        CosmosDocumentStore::new(url, KEY, "chat", "turns", 400, Duration::from_secs(5)).unwrap()
    }

    fn auth_matcher() -> Matcher {
        Matcher::Regex("^type%3Dmaster%26ver%3D1\\.0%26sig%3D.+$".into())
    }

    #[test]
    fn token_is_deterministic_and_case_folds_inputs() {
        let key = BASE64.decode(KEY).unwrap();
        let date = "Tue, 01 Jul 2025 10:00:00 GMT";
        let a = master_key_token(&key, "GET", "docs", "dbs/chat/colls/turns/docs/c1", date).unwrap();
        let b = master_key_token(&key, "get", "DOCS", "dbs/chat/colls/turns/docs/c1", &date.to_lowercase()).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D"));

        let other_link = master_key_token(&key, "GET", "docs", "dbs/chat/colls/turns/docs/c2", date).unwrap();
        assert_ne!(a, other_link);
    }

    #[test]
    fn partition_header_is_a_json_array() {
        assert_eq!(partition_header("conv-001"), r#"["conv-001"]"#);
    }

    #[test]
    fn missing_settings_are_reported_together() {
        let cfg = CosmosConfig {
            auth: AuthConfig::from_env("CT_COSMOS_TEST_UNSET_KEY"),
            ..CosmosConfig::default()
        };
        match CosmosDocumentStore::from_config(&cfg) {
            Err(Error::ConfigMissing(names)) => assert_eq!(names.len(), 4),
            Err(other) => panic!("expected ConfigMissing, got {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn create_item_treats_conflict_as_existing() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/dbs/chat/colls/turns/docs")
            .match_header("authorization", auth_matcher())
            .match_header("x-ms-version", API_VERSION)
            .match_header("x-ms-documentdb-partitionkey", r#"["c1"]"#)
            .with_status(201)
            .with_header("etag", "\"v1\"")
            .with_body(r#"{"id":"c1","_etag":"\"v1\""}"#)
            .expect(1)
            .create_async()
            .await;

        let s = store(&server.url());
        let out = s.create_item("c1", &json!({"id": "c1"})).await.unwrap();
        assert_eq!(out, CreateOutcome::Created("\"v1\"".into()));
        created.assert_async().await;
        created.remove_async().await;

        server
            .mock("POST", "/dbs/chat/colls/turns/docs")
            .with_status(409)
            .with_body(r#"{"code":"Conflict","message":"exists"}"#)
            .create_async()
            .await;
        let out = s.create_item("c1", &json!({"id": "c1"})).await.unwrap();
        assert_eq!(out, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn read_missing_item_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/dbs/chat/colls/turns/docs/nope")
            .with_status(404)
            .with_body(r#"{"code":"NotFound"}"#)
            .create_async()
            .await;
        assert!(store(&server.url()).read_item("nope", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_returns_body_and_etag() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/dbs/chat/colls/turns/docs/c1")
            .with_status(200)
            .with_header("etag", "\"v7\"")
            .with_body(r#"{"id":"c1","conversationId":"c1","turns":[]}"#)
            .create_async()
            .await;
        let item = store(&server.url()).read_item("c1", "c1").await.unwrap().unwrap();
        assert_eq!(item.etag, "\"v7\"");
        assert_eq!(item.body["conversationId"], "c1");
    }

    #[tokio::test]
    async fn replace_sends_if_match_and_maps_412() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/dbs/chat/colls/turns/docs/c1")
            .match_header("if-match", "\"stale\"")
            .with_status(412)
            .with_body(r#"{"code":"PreconditionFailed"}"#)
            .create_async()
            .await;
        let err = store(&server.url())
            .replace_item("c1", &json!({"id": "c1"}), "\"stale\"")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreConflict { .. }));
    }

    #[tokio::test]
    async fn replace_of_deleted_item_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/dbs/chat/colls/turns/docs/c1")
            .with_status(404)
            .with_body(r#"{"code":"NotFound"}"#)
            .create_async()
            .await;
        let out = store(&server.url())
            .replace_item("c1", &json!({"id": "c1"}), "\"e1\"")
            .await
            .unwrap();
        assert_eq!(out, ReplaceOutcome::NotFound);
    }

    #[tokio::test]
    async fn query_follows_continuation_tokens() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/dbs/chat/colls/turns/docs")
            .match_header("x-ms-documentdb-isquery", "True")
            .match_header("x-ms-documentdb-query-enablecrosspartition", "True")
            .match_header("x-ms-continuation", Matcher::Missing)
            .with_status(200)
            .with_header("x-ms-continuation", "page-2")
            .with_body(r#"{"Documents":[{"id":"c1:1"}],"_count":1}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/dbs/chat/colls/turns/docs")
            .match_header("x-ms-continuation", "page-2")
            .with_status(200)
            .with_body(r#"{"Documents":[{"id":"c1:2"}],"_count":1}"#)
            .create_async()
            .await;

        let docs = store(&server.url())
            .query_items(&ItemQuery::conversation("c1"), true)
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c1:1", "c1:2"]);
    }

    #[tokio::test]
    async fn server_errors_are_store_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .with_status(503)
            .with_body(r#"{"message":"service unavailable"}"#)
            .create_async()
            .await;
        let err = store(&server.url()).read_item("c1", "c1").await.unwrap_err();
        match err {
            Error::StoreUnavailable(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
