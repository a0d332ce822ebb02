//! Runtime construction extracted from `main.rs`.
//!
//! Validates the configuration, fails fast on missing credentials, and wires
//! the provider, the document store, and the orchestrator together. Nothing
//! here is a global: every handle is built once and passed down.

use std::sync::Arc;

use anyhow::Context;

use ct_conversations::backend::create_document_store;
use ct_conversations::ConversationStore;
use ct_domain::config::{Config, ConfigSeverity};
use ct_providers::LlmProvider;

use crate::runtime::Orchestrator;

/// Everything a turn needs, built once per process.
pub struct Runtime {
    pub config: Arc<Config>,
    pub store: Arc<ConversationStore>,
    pub orchestrator: Orchestrator,
}

/// Report validation issues and stop on any error-level one.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Validate config, check required settings against the process
/// environment, and return a fully wired [`Runtime`].
pub async fn build_runtime(config: Arc<Config>) -> anyhow::Result<Runtime> {
    // ── Config validation ────────────────────────────────────────────
    check_config(&config)?;
    config.require(&|name: &str| std::env::var(name).ok())?;

    // ── LLM provider ─────────────────────────────────────────────────
    let provider = ct_providers::create_provider(&config.llm).context("initializing LLM provider")?;

    build_runtime_with(config, provider).await
}

/// Same as [`build_runtime`] with an already constructed provider, and
/// without the environment check.
pub async fn build_runtime_with(
    config: Arc<Config>,
    provider: Arc<dyn LlmProvider>,
) -> anyhow::Result<Runtime> {
    // ── Conversation store ───────────────────────────────────────────
    let backend = create_document_store(&config.store).context("opening conversation store")?;
    let store = Arc::new(ConversationStore::new(backend, &config.store));
    store
        .provision(&config.store.cosmos.partition_key_path)
        .await
        .context("provisioning conversation store")?;
    tracing::info!(
        backend = store.backend().name(),
        max_conflict_retries = config.store.max_conflict_retries,
        "conversation store ready"
    );

    // ── Orchestrator ─────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(provider, store.clone(), &config);
    tracing::info!(policy = ?config.turn.persist_policy, "orchestrator ready");

    Ok(Runtime {
        config,
        store,
        orchestrator,
    })
}
