//! Turn execution: the orchestrator that ties conversation loading, prompt
//! building, LLM streaming, trace collection, and persistence into one pass.
//!
//! Entry point: [`Orchestrator::run_turn`] takes a conversation id plus the
//! user's text and returns a [`TurnOutcome`]. The generated text is always
//! in the outcome, even when the durable write failed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use ct_conversations::{ConversationDocument, ConversationStore};
use ct_domain::clock::{Clock, SystemClock};
use ct_domain::config::{Config, LlmConfig, PersistPolicy};
use ct_domain::error::{Error, Result};
use ct_domain::log::LogEvent;
use ct_domain::message::Message;
use ct_domain::stream::Accumulated;
use ct_domain::trace::{TraceCollector, TraceParams, TraceStatus};
use ct_domain::turn::{format_turn_id, ModelOrigin, TurnDraft, TurnRecord};
use ct_providers::{ChatRequest, LlmProvider};

use super::accumulator::{DeltaSink, StreamAccumulator};
use super::cancel::CancelToken;

/// Trace step recorded before the request is sent.
pub const STEP_PREPROCESS: &str = "preprocess";
/// Trace step recorded once the response stream ends, however it ends.
pub const STEP_LLM_STREAM: &str = "llm.chat.stream";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub conversation_id: String,
    pub user_message: String,
}

impl TurnInput {
    pub fn new(conversation_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_message: user_message.into(),
        }
    }
}

/// What happened to the durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    /// The turn is in the conversation document.
    Persisted,
    /// The write failed; the reason is the store error.
    Failed(String),
    /// Nothing was attempted because the store was unreachable up front.
    Skipped,
}

impl Persistence {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Persistence::Persisted)
    }
}

/// Result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The turn as built. When persistence failed its `turn_id` is the id the
    /// turn would have received.
    pub record: TurnRecord,
    pub persistence: Persistence,
    /// Set when the stream ended early and the partial output was kept.
    pub interruption: Option<String>,
}

impl TurnOutcome {
    pub fn output(&self) -> &str {
        &self.record.output
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    store: Arc<ConversationStore>,
    llm: LlmConfig,
    policy: PersistPolicy,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, store: Arc<ConversationStore>, config: &Config) -> Self {
        Self {
            provider,
            store,
            llm: config.llm.clone(),
            policy: config.turn.persist_policy,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn policy(&self) -> PersistPolicy {
        self.policy
    }

    /// Run a turn with no live sink and no cancellation.
    pub async fn run(&self, conversation_id: &str, user_message: &str) -> Result<TurnOutcome> {
        self.run_turn(&TurnInput::new(conversation_id, user_message), None, None)
            .await
    }

    /// Run one turn: load history, stream the reply, record milestones,
    /// persist.
    ///
    /// Under [`PersistPolicy::Strict`] any LLM-side failure is returned as an
    /// error and nothing is written. Under [`PersistPolicy::BestEffort`] the
    /// partial output is persisted with a failed `llm.chat.stream` step and
    /// the outcome carries the interruption. A failed write never turns into
    /// an error: it is reported through [`TurnOutcome::persistence`].
    pub async fn run_turn(
        &self,
        input: &TurnInput,
        sink: Option<DeltaSink<'_>>,
        cancel: Option<CancelToken>,
    ) -> Result<TurnOutcome> {
        let conversation_span = tracing::info_span!(
            "conversation",
            "otel.kind" = "INTERNAL",
            app.conversation.id = %input.conversation_id,
        );
        let turn_span = tracing::info_span!(
            parent: &conversation_span,
            "turn",
            "otel.kind" = "INTERNAL",
            app.conversation.id = %input.conversation_id,
            app.turn.index = tracing::field::Empty,
            llm.deployment = %self.provider.model(),
            llm.vendor = %self.provider.provider_id(),
            llm.temperature = f64::from(self.llm.temperature),
            turn.input.length = input.user_message.chars().count(),
            turn.output.length = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.usage.total_tokens = tracing::field::Empty,
        );

        self.run_turn_inner(input, sink, cancel, turn_span.clone())
            .instrument(turn_span)
            .await
    }

    async fn run_turn_inner(
        &self,
        input: &TurnInput,
        sink: Option<DeltaSink<'_>>,
        cancel: Option<CancelToken>,
        span: tracing::Span,
    ) -> Result<TurnOutcome> {
        // ── Phase 1: conversation ────────────────────────────────────
        let conversation = match self.store.ensure_conversation(&input.conversation_id).await {
            Ok(doc) => Some(doc),
            Err(e) if self.policy == PersistPolicy::BestEffort => {
                tracing::warn!(
                    conversation_id = %input.conversation_id,
                    error = %e,
                    "conversation store unavailable; continuing without history"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let mut trace = TraceCollector::new();
        trace.start();

        // ── Phase 2: prompt ──────────────────────────────────────────
        let messages = self.build_messages(conversation.as_ref(), &input.user_message);
        trace.ok(
            STEP_PREPROCESS,
            TraceParams::new()
                .with("length", input.user_message.chars().count())
                .with("provider", self.provider.provider_id())
                .with("model", self.provider.model())
                .with("history_turns", (messages.len() - 2) / 2),
        );

        // ── Phase 3: stream ──────────────────────────────────────────
        let req = ChatRequest {
            messages,
            temperature: Some(self.llm.temperature),
            top_p: self.llm.top_p,
            max_tokens: self.llm.max_tokens,
            model: None,
        };

        let started = Instant::now();
        let streamed = self.stream_reply(&req, sink, cancel.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (output, interruption) = match streamed {
            Ok(acc) => {
                trace.ok(STEP_LLM_STREAM, stream_params(&acc));
                (acc, None)
            }
            Err(e) if self.policy == PersistPolicy::Strict => {
                tracing::warn!(error = %e, "LLM stream failed; nothing persisted");
                return Err(e);
            }
            Err(e) => {
                let partial = e.partial_output().cloned().unwrap_or_default();
                let status = if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    TraceStatus::Cancelled
                } else {
                    TraceStatus::Error
                };
                let reason = interruption_reason(&e);
                trace.record(
                    STEP_LLM_STREAM,
                    status,
                    stream_params(&partial).with("error", reason.as_str()),
                );
                tracing::warn!(error = %e, "LLM stream failed; keeping partial output");
                (partial, Some(reason))
            }
        };

        LogEvent::LlmStream {
            provider: self.provider.provider_id().to_owned(),
            model: self.provider.model().to_owned(),
            duration_ms,
            output_chars: output.text.chars().count(),
            prompt_tokens: output.usage.prompt_tokens,
            completion_tokens: output.usage.completion_tokens,
        }
        .emit();
        record_output(&span, &output);

        // ── Phase 4: persist ─────────────────────────────────────────
        let origin = ModelOrigin::new(self.provider.provider_id(), self.provider.model());
        let draft = TurnDraft::new(
            input.user_message.as_str(),
            output,
            trace.into_events(),
            &origin,
            self.clock.as_ref(),
        );
        let expected_id = format_turn_id(conversation.as_ref().map_or(1, |c| c.next_sequence()));

        let (record, persistence) = match conversation {
            None => (draft.assign(expected_id), Persistence::Skipped),
            Some(_) => match self.store.append_turn(&input.conversation_id, draft.clone()).await {
                Ok(record) => (record, Persistence::Persisted),
                Err(e) => {
                    tracing::error!(
                        conversation_id = %input.conversation_id,
                        error = %e,
                        "turn generated but not persisted"
                    );
                    (draft.assign(expected_id), Persistence::Failed(e.to_string()))
                }
            },
        };

        if persistence.is_persisted() {
            span.record("app.turn.index", record.turn_id.as_str());
        }

        Ok(TurnOutcome {
            record,
            persistence,
            interruption,
        })
    }

    /// System prompt, then the last `max_history_turns` turns as
    /// user/assistant pairs, then the new user message.
    fn build_messages(&self, conversation: Option<&ConversationDocument>, user_message: &str) -> Vec<Message> {
        let history = conversation.map_or(&[][..], |c| c.recent_turns(self.llm.max_history_turns));
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(Message::system(self.llm.system_prompt.as_str()));
        messages.extend(history.iter().flat_map(TurnRecord::to_messages));
        messages.push(Message::user(user_message));
        messages
    }

    async fn stream_reply(
        &self,
        req: &ChatRequest,
        sink: Option<DeltaSink<'_>>,
        cancel: Option<CancelToken>,
    ) -> Result<Accumulated> {
        let stream = self.provider.chat_stream(req).await?;

        let mut acc = StreamAccumulator::new()
            .with_idle_timeout(Duration::from_millis(self.llm.stream_idle_timeout_ms));
        if let Some(sink) = sink {
            acc = acc.with_sink(sink);
        }
        if let Some(cancel) = cancel {
            acc = acc.with_cancel(cancel);
        }
        acc.drain(stream).await
    }
}

fn stream_params(acc: &Accumulated) -> TraceParams {
    TraceParams::new()
        .with("length", acc.text.chars().count())
        .with("have_usage", acc.usage.is_reported())
}

fn interruption_reason(e: &Error) -> String {
    match e {
        Error::StreamInterrupted { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

fn record_output(span: &tracing::Span, output: &Accumulated) {
    span.record("turn.output.length", output.text.chars().count());
    if let Some(n) = output.usage.prompt_tokens {
        span.record("gen_ai.usage.input_tokens", n);
    }
    if let Some(n) = output.usage.completion_tokens {
        span.record("gen_ai.usage.output_tokens", n);
    }
    if let Some(n) = output.usage.total_tokens {
        span.record("gen_ai.usage.total_tokens", n);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ct_conversations::backend::MemoryDocumentStore;
    use ct_domain::clock::FixedClock;
    use ct_domain::config::StoreConfig;
    use ct_domain::message::Role;
    use ct_domain::stream::UsageSummary;
    use ct_providers::ScriptedProvider;

    fn orchestrator(provider: Arc<ScriptedProvider>, config: &Config) -> Orchestrator {
        let store = Arc::new(ConversationStore::new(
            Arc::new(MemoryDocumentStore::new()),
            &StoreConfig::default(),
        ));
        Orchestrator::new(provider, store, config).with_clock(Arc::new(FixedClock(1_700_000_000)))
    }

    #[tokio::test]
    async fn history_is_replayed_and_capped() {
        let provider = Arc::new(ScriptedProvider::from_text(&["ok"], None));
        let mut config = Config::default();
        config.llm.max_history_turns = 2;
        let orch = orchestrator(provider.clone(), &config);

        for q in ["one", "two", "three"] {
            orch.run("c", q).await.unwrap();
        }

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].messages.len(), 2);

        let last = &requests[2].messages;
        assert_eq!(last.len(), 6);
        assert_eq!(last[0].role, Role::System);
        assert_eq!(last[0].content, "You are a concise assistant.");
        assert_eq!(last[1].content, "one");
        assert_eq!(last[2].role, Role::Assistant);
        assert_eq!(last[3].content, "two");
        assert_eq!(last[5].content, "three");
        assert_eq!(requests[2].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn trace_has_both_milestones_in_order() {
        let provider = Arc::new(ScriptedProvider::from_text(
            &["Hi"],
            Some(UsageSummary::new(1, 1, 2)),
        ));
        let orch = orchestrator(provider, &Config::default());
        let outcome = orch.run("c", "hello").await.unwrap();

        let trace = &outcome.record.trace;
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].step, STEP_PREPROCESS);
        assert_eq!(trace[0].params["length"], "5");
        assert_eq!(trace[0].params["provider"], "scripted");
        assert_eq!(trace[1].step, STEP_LLM_STREAM);
        assert_eq!(trace[1].status, TraceStatus::Ok);
        assert_eq!(trace[1].params["have_usage"], "true");
        assert!(trace[0].elapsed_ms <= trace[1].elapsed_ms);
        assert_eq!(outcome.record.timestamp, 1_700_000_000);
        assert_eq!(outcome.record.model, "scripted-model");
    }

    #[tokio::test]
    async fn refused_request_under_strict_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()).refusing("quota exceeded"));
        let orch = orchestrator(provider, &Config::default());
        let err = orch.run("c", "q").await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        let doc = orch.store().get_conversation("c").await.unwrap().unwrap();
        assert!(doc.turns.is_empty());
    }

    #[tokio::test]
    async fn refused_request_under_best_effort_is_recorded() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()).refusing("quota exceeded"));
        let mut config = Config::default();
        config.turn.persist_policy = PersistPolicy::BestEffort;
        let orch = orchestrator(provider, &config);

        let outcome = orch.run("c", "q").await.unwrap();
        assert!(outcome.persistence.is_persisted());
        assert!(outcome.interruption.as_deref().unwrap().contains("quota exceeded"));
        assert_eq!(outcome.record.trace[1].status, TraceStatus::Error);
        assert_eq!(outcome.output(), "");
    }
}
