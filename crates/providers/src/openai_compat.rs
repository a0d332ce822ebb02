//! OpenAI-compatible streaming adapter.
//!
//! Works with Azure OpenAI deployments and any endpoint that follows the
//! OpenAI chat completions contract (OpenAI, Ollama, vLLM, LM Studio).

use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use ct_domain::config::{LlmConfig, ProviderKind};
use ct_domain::error::{Error, Result};
use ct_domain::message::Message;
use ct_domain::stream::{BoxStream, Fragment, UsageSummary};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for an OpenAI-compatible API endpoint.
///
/// Azure OpenAI uses the same wire format but a different URL pattern
/// (`/openai/deployments/{deployment}/chat/completions?api-version=..`)
/// and auth header (`api-key` instead of `Authorization: Bearer`).
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    api_version: String,
    client: reqwest::Client,
    is_azure: bool,
}

impl OpenAiCompatProvider {
    /// Create a provider from config, resolving the API key from the
    /// environment.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        Self::with_api_key(cfg, api_key)
    }

    /// Create a provider with an already-resolved key.
    pub fn with_api_key(cfg: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let mut missing = Vec::new();
        let base_url = non_blank(&cfg.base_url);
        let deployment = non_blank(&cfg.deployment);
        if base_url.is_none() {
            missing.push("AZURE_OPENAI_ENDPOINT (llm.base_url)".to_string());
        }
        if deployment.is_none() {
            missing.push("AZURE_OPENAI_DEPLOYMENT (llm.deployment)".to_string());
        }
        let (Some(base_url), Some(deployment)) = (base_url, deployment) else {
            return Err(Error::ConfigMissing(missing));
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: deployment.to_string(),
            api_version: cfg.api_version.clone(),
            client,
            is_azure: cfg.kind == ProviderKind::AzureOpenai,
        })
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        let builder = if self.is_azure {
            builder.header("api-key", &self.api_key)
        } else {
            builder.bearer_auth(&self.api_key)
        };
        builder.header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn chat_url(&self, model: &str) -> String {
        if self.is_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url,
                urlencoding::encode(model),
                urlencoding::encode(&self.api_version)
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        // Azure embeds the deployment in the URL; standard OpenAI needs the
        // model in the body.
        if !self.is_azure {
            body["model"] = Value::String(self.effective_model(req));
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn msg_to_openai(msg: &Message) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE chunk decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_openai_usage(v: &Value) -> Option<UsageSummary> {
    if !v.is_object() {
        return None;
    }
    let field = |name: &str| {
        v.get(name)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    Some(UsageSummary {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}

/// Decode one `data:` payload into fragments.
///
/// - `[DONE]` yields nothing; the stream ending is the terminal signal.
/// - A chunk with both a text delta and usage yields text, then usage.
/// - Role-only deltas, content-filter chunks and `finish_reason` chunks
///   without usage yield [`Fragment::Empty`].
pub(crate) fn parse_sse_data(provider: &str, data: &str) -> Vec<Result<Fragment>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return vec![Err(Error::Provider {
            provider: provider.to_string(),
            message,
        })];
    }

    let mut fragments = Vec::new();

    let text = v
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty());
    if let Some(text) = text {
        fragments.push(Ok(Fragment::text(text)));
    }

    if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
        fragments.push(Ok(Fragment::usage(usage)));
    }

    if fragments.is_empty() {
        fragments.push(Ok(Fragment::Empty));
    }
    fragments
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<Fragment>>> {
        let url = self.chat_url(&self.effective_model(req));
        let body = self.build_chat_body(req);
        let provider_id = self.id.clone();

        tracing::debug!(
            provider = %self.id,
            messages = req.messages.len(),
            "openai_compat stream request"
        );

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(Error::Auth(format!(
                    "{provider_id}: HTTP {} - {err_text}",
                    status.as_u16()
                )));
            }
            return Err(Error::Provider {
                provider: provider_id,
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_sse_data(&provider_id, data)
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.default_model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
