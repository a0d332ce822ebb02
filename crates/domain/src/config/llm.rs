use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single chat-completion deployment every turn is sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Label persisted in each turn's `provider` field.
    #[serde(default = "d_provider_id")]
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Endpoint root, e.g. `https://my-resource.openai.azure.com`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Deployment name (Azure) or model name (OpenAI-compatible).
    #[serde(default)]
    pub deployment: Option<String>,
    /// Azure `api-version` query parameter.
    #[serde(default = "d_api_version")]
    pub api_version: String,
    #[serde(default = "d_llm_auth")]
    pub auth: AuthConfig,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    /// Prior turns replayed into each request (oldest dropped first).
    #[serde(default = "d_20")]
    pub max_history_turns: usize,
    #[serde(default = "d_120000")]
    pub request_timeout_ms: u64,
    /// Longest silence tolerated between two streamed chunks.
    #[serde(default = "d_60000")]
    pub stream_idle_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            id: d_provider_id(),
            kind: ProviderKind::AzureOpenai,
            base_url: None,
            deployment: None,
            api_version: d_api_version(),
            auth: d_llm_auth(),
            temperature: d_temperature(),
            top_p: None,
            max_tokens: None,
            system_prompt: d_system_prompt(),
            max_history_turns: d_20(),
            request_timeout_ms: d_120000(),
            stream_idle_timeout_ms: d_60000(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/openai/deployments/{deployment}/chat/completions` with `api-key`.
    #[default]
    AzureOpenai,
    /// `/chat/completions` with `Authorization: Bearer`.
    OpenaiCompat,
    /// Canned local reply; no endpoint or key. Pair with the memory store
    /// backend for a fully offline run.
    Scripted,
}

/// Where a secret comes from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

impl AuthConfig {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            env: Some(var.into()),
            key: None,
        }
    }

    /// True when a key is configured inline or the env var resolves.
    pub fn is_resolvable(&self, lookup: &dyn Fn(&str) -> Option<String>) -> bool {
        self.key.as_deref().is_some_and(|k| !k.is_empty())
            || self
                .env
                .as_deref()
                .and_then(lookup)
                .is_some_and(|k| !k.is_empty())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_provider_id() -> String {
    "azure-openai".into()
}
fn d_api_version() -> String {
    "2024-12-01-preview".into()
}
fn d_llm_auth() -> AuthConfig {
    AuthConfig::from_env("AZURE_OPENAI_API_KEY")
}
fn d_temperature() -> f32 {
    0.2
}
fn d_system_prompt() -> String {
    "You are a concise assistant.".into()
}
fn d_20() -> usize {
    20
}
fn d_120000() -> u64 {
    120_000
}
fn d_60000() -> u64 {
    60_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
