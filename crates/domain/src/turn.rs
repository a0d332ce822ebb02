//! Turn records: the atomic unit of persistence.
//!
//! A [`TurnDraft`] holds everything about a finished turn except its id.
//! The conversation store derives the id under its concurrency guard and
//! stamps it with [`TurnDraft::assign`], producing an immutable
//! [`TurnRecord`].

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::message::Message;
use crate::stream::{Accumulated, UsageSummary};
use crate::trace::TraceEvent;

/// Which provider and model produced a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOrigin {
    pub provider: String,
    pub model: String,
}

impl ModelOrigin {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// One user input plus one generated response, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub turn_id: String,
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub tokens: UsageSummary,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
    /// Unix seconds.
    #[serde(rename = "ts", default)]
    pub timestamp: i64,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}

impl TurnRecord {
    /// Numeric value of the turn id, if it is a decimal number.
    pub fn sequence(&self) -> Option<u64> {
        parse_turn_id(&self.turn_id)
    }

    /// The user/assistant message pair this turn contributes to a prompt.
    pub fn to_messages(&self) -> [Message; 2] {
        [Message::user(&self.input), Message::assistant(&self.output)]
    }
}

/// A completed turn that has not been given an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnDraft {
    pub input: String,
    pub output: String,
    pub tokens: UsageSummary,
    pub trace: Vec<TraceEvent>,
    pub timestamp: i64,
    pub provider: String,
    pub model: String,
}

impl TurnDraft {
    pub fn new(
        input: impl Into<String>,
        output: Accumulated,
        trace: Vec<TraceEvent>,
        origin: &ModelOrigin,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.text,
            tokens: output.usage,
            trace,
            timestamp: clock.now_unix(),
            provider: origin.provider.clone(),
            model: origin.model.clone(),
        }
    }

    /// Stamp the draft with its turn id.
    pub fn assign(self, turn_id: impl Into<String>) -> TurnRecord {
        TurnRecord {
            turn_id: turn_id.into(),
            input: self.input,
            output: self.output,
            tokens: self.tokens,
            trace: self.trace,
            timestamp: self.timestamp,
            provider: self.provider,
            model: self.model,
        }
    }
}

/// Package a turn's accumulated output, usage and trace into a record.
///
/// Pure apart from reading `clock` for the timestamp.
pub fn build_turn(
    turn_id: impl Into<String>,
    input: impl Into<String>,
    output: Accumulated,
    trace: Vec<TraceEvent>,
    origin: &ModelOrigin,
    clock: &dyn Clock,
) -> TurnRecord {
    TurnDraft::new(input, output, trace, origin, clock).assign(turn_id)
}

/// Canonical string form of a turn sequence number.
pub fn format_turn_id(sequence: u64) -> String {
    sequence.to_string()
}

/// Parse a decimal turn id. Leading zeros are accepted (`"001"` is 1).
pub fn parse_turn_id(turn_id: &str) -> Option<u64> {
    let trimmed = turn_id.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
