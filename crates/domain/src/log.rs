use serde::Serialize;

/// Structured lifecycle events emitted across all convtrace crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum LogEvent {
    ConversationEnsured {
        conversation_id: String,
        created: bool,
    },
    TurnAppended {
        conversation_id: String,
        turn_id: String,
        attempts: u32,
    },
    TurnConflictRetry {
        conversation_id: String,
        attempt: u32,
    },
    LlmStream {
        provider: String,
        model: String,
        duration_ms: u64,
        output_chars: usize,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    FlatTurnsImported {
        conversation_id: String,
        imported: usize,
    },
}

impl LogEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ct_event");
    }
}
