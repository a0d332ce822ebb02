use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::llm::AuthConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub file: FileStoreConfig,
    #[serde(default)]
    pub cosmos: CosmosConfig,
    /// Re-read-and-retry attempts after a conditional write loses a race.
    #[serde(default = "d_5")]
    pub max_conflict_retries: u32,
    /// Base delay of the exponential backoff between conflict retries.
    #[serde(default = "d_25")]
    pub conflict_backoff_ms: u64,
    /// Allow queries to fan out across partitions.
    #[serde(default = "d_true")]
    pub cross_partition_queries: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            file: FileStoreConfig::default(),
            cosmos: CosmosConfig::default(),
            max_conflict_retries: d_5(),
            conflict_backoff_ms: d_25(),
            cross_partition_queries: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local, lost on exit.
    Memory,
    /// One JSON file per document under `file.path`.
    #[default]
    File,
    /// Azure Cosmos DB (SQL API) over REST.
    Cosmos,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => Ok(StoreBackend::File),
            "cosmos" => Ok(StoreBackend::Cosmos),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStoreConfig {
    #[serde(default = "d_file_path")]
    pub path: PathBuf,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self { path: d_file_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosConfig {
    /// Account endpoint, e.g. `https://my-account.documents.azure.com:443/`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Master key (base64).
    #[serde(default = "d_cosmos_auth")]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default = "d_partition_key_path")]
    pub partition_key_path: String,
    /// Provisioned RU/s used when the container has to be created.
    #[serde(default = "d_400")]
    pub offer_throughput: u32,
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
}

impl Default for CosmosConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth: d_cosmos_auth(),
            database: None,
            container: None,
            partition_key_path: d_partition_key_path(),
            offer_throughput: d_400(),
            timeout_ms: d_30000(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5() -> u32 {
    5
}
fn d_25() -> u64 {
    25
}
fn d_true() -> bool {
    true
}
fn d_400() -> u32 {
    400
}
fn d_30000() -> u64 {
    30_000
}
fn d_file_path() -> PathBuf {
    PathBuf::from("./data/documents")
}
fn d_cosmos_auth() -> AuthConfig {
    AuthConfig::from_env("COSMOS_KEY")
}
fn d_partition_key_path() -> String {
    "/conversationId".into()
}
