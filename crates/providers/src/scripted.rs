//! A provider that replays a fixed script of fragments.
//!
//! Used by tests to drive the orchestrator without a network endpoint, and
//! by `llm.kind = "scripted"` for offline runs. Every request is recorded so
//! callers can inspect the prompt that was sent.

use crate::traits::{ChatRequest, LlmProvider};
use ct_domain::config::LlmConfig;
use ct_domain::error::{Error, Result};
use ct_domain::stream::{BoxStream, Fragment, UsageSummary};
use parking_lot::Mutex;
use std::time::Duration;

/// Reply streamed by [`ScriptedProvider::offline`].
pub(crate) const OFFLINE_REPLY: &str = "1. FitMind: an AI coach that adapts each session.\n\
                             2. RepWise: smart rep counting and form tips.\n\
                             3. PulsePlan: weekly plans tuned to your recovery.";

/// One step of a scripted response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(Fragment),
    /// Yield a transport error and end the stream.
    Fail(String),
    /// Sleep before the next step.
    Pause(Duration),
}

pub struct ScriptedProvider {
    id: String,
    model: String,
    steps: Vec<ScriptStep>,
    /// Fail `chat_stream` itself, before any fragment.
    refuse: Option<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            id: "scripted".into(),
            model: "scripted-model".into(),
            steps,
            refuse: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script that streams `chunks` as text and then, if given, one usage
    /// fragment.
    pub fn from_text(chunks: &[&str], usage: Option<UsageSummary>) -> Self {
        let mut steps: Vec<ScriptStep> = chunks
            .iter()
            .map(|c| ScriptStep::Emit(Fragment::text(*c)))
            .collect();
        if let Some(usage) = usage {
            steps.push(ScriptStep::Emit(Fragment::usage(usage)));
        }
        Self::new(steps)
    }

    /// Stand-in for a real deployment: streams a canned reply word by word,
    /// without usage. The model label is `cfg.deployment` when set.
    pub fn offline(cfg: &LlmConfig) -> Self {
        let chunks: Vec<&str> = OFFLINE_REPLY.split_inclusive(' ').collect();
        let model = cfg.deployment.clone().unwrap_or_else(|| "scripted-model".into());
        Self::from_text(&chunks, None).with_identity("scripted", model)
    }

    pub fn with_identity(mut self, id: impl Into<String>, model: impl Into<String>) -> Self {
        self.id = id.into();
        self.model = model.into();
        self
    }

    /// Make every `chat_stream` call fail with a provider error.
    pub fn refusing(mut self, message: impl Into<String>) -> Self {
        self.refuse = Some(message.into());
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<Fragment>>> {
        self.requests.lock().push(req.clone());

        if let Some(ref message) = self.refuse {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: message.clone(),
            });
        }

        let steps = self.steps.clone();
        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Emit(fragment) => yield Ok(fragment),
                    ScriptStep::Fail(reason) => {
                        yield Err(Error::Http(reason));
                        break;
                    }
                    ScriptStep::Pause(d) => tokio::time::sleep(d).await,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }
}
