use ct_domain::error::Result;
use ct_domain::message::Message;
use ct_domain::stream::{BoxStream, Fragment};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send, oldest first.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff. `None` lets the provider choose.
    pub top_p: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Adapters translate the request into their wire format and decode every
/// streamed chunk into [`Fragment`]s exactly once. A chunk carrying both text
/// and usage becomes two fragments, text first.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and return a stream of fragments.
    ///
    /// Errors returned here happen before the first fragment (connection,
    /// auth, HTTP status). Errors yielded by the stream are mid-stream
    /// transport failures.
    async fn chat_stream(&self, req: &ChatRequest)
        -> Result<BoxStream<'static, Result<Fragment>>>;

    /// A unique identifier for this provider instance, persisted with turns.
    fn provider_id(&self) -> &str;

    /// The model (or deployment) requests go to when `ChatRequest::model` is
    /// unset.
    fn model(&self) -> &str;
}
