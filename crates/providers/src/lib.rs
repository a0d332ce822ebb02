//! LLM provider boundary: the [`LlmProvider`] trait, an OpenAI / Azure
//! OpenAI streaming adapter, and a scripted provider for tests and offline
//! runs.

pub mod openai_compat;
pub mod scripted;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

use std::sync::Arc;

use ct_domain::config::{LlmConfig, ProviderKind};
use ct_domain::error::Result;

// Re-exports for convenience.
pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptStep, ScriptedProvider};
pub use traits::{ChatRequest, LlmProvider};
pub use util::resolve_api_key;

/// Build the provider described by `cfg`.
///
/// The two network kinds share the OpenAI wire format; the adapter picks the
/// URL layout and auth header from `cfg.kind`. `Scripted` needs no endpoint.
pub fn create_provider(cfg: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match cfg.kind {
        ProviderKind::Scripted => Arc::new(ScriptedProvider::offline(cfg)),
        ProviderKind::AzureOpenai | ProviderKind::OpenaiCompat => {
            Arc::new(OpenAiCompatProvider::from_config(cfg)?)
        }
    };
    tracing::info!(
        provider = %provider.provider_id(),
        model = %provider.model(),
        kind = ?cfg.kind,
        "LLM provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripted_kind_streams_offline_reply() {
        let cfg = LlmConfig {
            kind: ProviderKind::Scripted,
            ..LlmConfig::default()
        };
        let provider = create_provider(&cfg).unwrap();
        assert_eq!(provider.provider_id(), "scripted");
        assert_eq!(provider.model(), "scripted-model");

        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            if let ct_domain::stream::Fragment::Text { text: t } = fragment.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, scripted::OFFLINE_REPLY);
        assert!(text.starts_with("1. FitMind"));
    }
}
