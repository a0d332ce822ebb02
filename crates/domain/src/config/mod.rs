mod llm;
mod observability;
mod store;
mod turn;

pub use llm::*;
pub use observability::*;
pub use store::*;
pub use turn::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overlay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Overlay well-known environment variables on top of the file config.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a map.
    pub fn apply_env(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") {
            self.llm.deployment = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
            self.llm.api_version = v;
        }
        // Older deployments export the key as AZURE_OPENAI_KEY.
        let primary_set = self.llm.auth.env.as_deref().and_then(get).is_some();
        if !primary_set && self.llm.auth.key.is_none() && get("AZURE_OPENAI_KEY").is_some() {
            self.llm.auth.env = Some("AZURE_OPENAI_KEY".into());
        }

        if let Some(v) = get("CT_STORE_BACKEND") {
            match v.parse() {
                Ok(backend) => self.store.backend = backend,
                Err(e) => tracing::warn!(error = %e, "ignoring CT_STORE_BACKEND"),
            }
        }
        if let Some(v) = get("COSMOS_URL") {
            self.store.cosmos.endpoint = Some(v);
        }
        if let Some(v) = get("COSMOS_DB") {
            self.store.cosmos.database = Some(v);
        }
        if let Some(v) = get("COSMOS_CONTAINER") {
            self.store.cosmos.container = Some(v);
        }

        if let Some(v) = get("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.observability.otlp_endpoint = Some(v);
        }
    }

    /// Names of required settings that are absent for the selected provider
    /// and store backend.
    pub fn missing_required(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Vec<String> {
        let mut missing = Vec::new();

        if self.llm.kind != ProviderKind::Scripted {
            if is_blank(&self.llm.base_url) {
                missing.push("AZURE_OPENAI_ENDPOINT (llm.base_url)".to_string());
            }
            if is_blank(&self.llm.deployment) {
                missing.push("AZURE_OPENAI_DEPLOYMENT (llm.deployment)".to_string());
            }
            if !self.llm.auth.is_resolvable(lookup) {
                missing.push(auth_label(&self.llm.auth, "llm.auth"));
            }
        }

        if self.store.backend == StoreBackend::Cosmos {
            let cosmos = &self.store.cosmos;
            if is_blank(&cosmos.endpoint) {
                missing.push("COSMOS_URL (store.cosmos.endpoint)".to_string());
            }
            if !cosmos.auth.is_resolvable(lookup) {
                missing.push(auth_label(&cosmos.auth, "store.cosmos.auth"));
            }
            if is_blank(&cosmos.database) {
                missing.push("COSMOS_DB (store.cosmos.database)".to_string());
            }
            if is_blank(&cosmos.container) {
                missing.push("COSMOS_CONTAINER (store.cosmos.container)".to_string());
            }
        }

        missing
    }

    /// Fail fast with [`Error::ConfigMissing`] before any network call.
    pub fn require(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        let missing = self.missing_required(lookup);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigMissing(missing))
        }
    }
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn auth_label(auth: &AuthConfig, field: &str) -> String {
    match auth.env.as_deref() {
        Some(var) => format!("{var} ({field})"),
        None => format!("{field}.key"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate value ranges and return a list of issues.
    ///
    /// Missing credentials are not reported here; see [`Config::require`].
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.temperature".into(),
                message: "temperature must be between 0.0 and 2.0".into(),
            });
        }

        if self.llm.top_p.is_some_and(|p| !(0.0..=1.0).contains(&p)) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.top_p".into(),
                message: "top_p must be between 0.0 and 1.0".into(),
            });
        }

        if self.llm.stream_idle_timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.stream_idle_timeout_ms".into(),
                message: "idle timeout must be greater than 0".into(),
            });
        }

        if self.llm.id.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.id".into(),
                message: "provider id must not be empty".into(),
            });
        }

        if self.store.max_conflict_retries == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "store.max_conflict_retries".into(),
                message: "concurrent turns on one conversation will fail on the first conflict"
                    .into(),
            });
        }

        if self.store.backend == StoreBackend::Memory {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "store.backend".into(),
                message: "memory backend does not survive process exit".into(),
            });
        }

        if !self.store.cosmos.partition_key_path.starts_with('/') {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "store.cosmos.partition_key_path".into(),
                message: "partition key path must start with '/'".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "observability.sample_rate".into(),
                message: "sample_rate must be between 0.0 and 1.0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
