use serde::{Deserialize, Serialize};

use ct_domain::turn::TurnRecord;

/// Name of the partition attribute shared by both document layouts.
pub const PARTITION_FIELD: &str = "conversationId";

/// All turns of one conversation in a single document.
///
/// `id` equals `conversation_id`; both are kept so the partition attribute
/// is present on the body as the store requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDocument {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub turns: Vec<TurnRecord>,
}

impl ConversationDocument {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            id: conversation_id.clone(),
            conversation_id,
            turns: Vec::new(),
        }
    }

    /// Sequence number the next appended turn receives.
    pub fn next_sequence(&self) -> u64 {
        self.turns.len() as u64 + 1
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[TurnRecord] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

/// One turn per document, keyed `"{conversationId}:{turnId}"`.
///
/// Written by older deployments; read through [`crate::legacy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatTurnDocument {
    pub id: String,
    pub conversation_id: String,
    #[serde(flatten)]
    pub turn: TurnRecord,
}

impl FlatTurnDocument {
    pub fn new(conversation_id: impl Into<String>, turn: TurnRecord) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            id: flat_id(&conversation_id, &turn.turn_id),
            conversation_id,
            turn,
        }
    }
}

pub fn flat_id(conversation_id: &str, turn_id: &str) -> String {
    format!("{conversation_id}:{turn_id}")
}
