use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One incremental unit of a streamed chat completion.
///
/// Provider adapters decode their wire chunks into fragments exactly once;
/// everything downstream matches on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    /// Partial assistant text.
    Text { text: String },
    /// Token accounting, normally sent once on the terminal chunk.
    Usage { usage: UsageSummary },
    /// Heartbeat, role-only delta, or any chunk with nothing to keep.
    Empty,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text { text: text.into() }
    }

    pub fn usage(usage: UsageSummary) -> Self {
        Fragment::Usage { usage }
    }
}

/// Token usage for one turn. Every field is optional: a stream that never
/// reports usage is a valid outcome and serializes as three nulls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    #[serde(rename = "prompt", default)]
    pub prompt_tokens: Option<u32>,
    #[serde(rename = "completion", default)]
    pub completion_tokens: Option<u32>,
    #[serde(rename = "total", default)]
    pub total_tokens: Option<u32>,
}

impl UsageSummary {
    pub fn new(prompt: u32, completion: u32, total: u32) -> Self {
        Self {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            total_tokens: Some(total),
        }
    }

    /// True when the provider reported at least one counter.
    pub fn is_reported(&self) -> bool {
        self.prompt_tokens.is_some()
            || self.completion_tokens.is_some()
            || self.total_tokens.is_some()
    }
}

/// Final (or partial) result of draining a fragment stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulated {
    pub text: String,
    pub usage: UsageSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_usage_serializes_as_nulls() {
        let json = serde_json::to_value(UsageSummary::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"prompt": null, "completion": null, "total": null})
        );
    }

    #[test]
    fn usage_uses_short_field_names() {
        let json = serde_json::to_value(UsageSummary::new(5, 3, 8)).unwrap();
        assert_eq!(json, serde_json::json!({"prompt": 5, "completion": 3, "total": 8}));
        assert!(UsageSummary::new(5, 3, 8).is_reported());
        assert!(!UsageSummary::default().is_reported());
    }

    #[test]
    fn fragment_tagging() {
        let json = serde_json::to_value(Fragment::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));
        let json = serde_json::to_value(Fragment::Empty).unwrap();
        assert_eq!(json, serde_json::json!({"type": "empty"}));
    }
}
