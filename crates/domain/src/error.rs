use crate::stream::Accumulated;

/// Shared error type used across all convtrace crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Required credentials or endpoints are absent. Always fatal at startup.
    #[error("missing required configuration: {}", .0.join(", "))]
    ConfigMissing(Vec<String>),

    /// The response stream failed after it started. `partial` holds whatever
    /// text and usage arrived before the failure.
    #[error("stream interrupted: {reason}")]
    StreamInterrupted {
        reason: String,
        partial: Box<Accumulated>,
    },

    /// The persistence layer could not be reached or refused the request.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A conditional write lost a race against another writer.
    #[error("store conflict on {id}: {reason}")]
    StoreConflict { id: String, reason: String },

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller may reasonably retry the operation that produced
    /// this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreConflict { .. } | Error::StreamInterrupted { .. }
        )
    }

    /// Partial output carried by a [`Error::StreamInterrupted`].
    pub fn partial_output(&self) -> Option<&Accumulated> {
        match self {
            Error::StreamInterrupted { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::UsageSummary;

    #[test]
    fn config_missing_lists_every_name() {
        let err = Error::ConfigMissing(vec!["COSMOS_URL".into(), "COSMOS_KEY".into()]);
        assert_eq!(
            err.to_string(),
            "missing required configuration: COSMOS_URL, COSMOS_KEY"
        );
    }

    #[test]
    fn retryable_kinds() {
        let conflict = Error::StoreConflict {
            id: "conv-1".into(),
            reason: "etag mismatch".into(),
        };
        assert!(conflict.is_retryable());
        assert!(!Error::ConversationNotFound("conv-1".into()).is_retryable());
        assert!(!Error::StoreUnavailable("down".into()).is_retryable());
    }

    #[test]
    fn interrupted_exposes_partial() {
        let err = Error::StreamInterrupted {
            reason: "connection reset".into(),
            partial: Box::new(Accumulated {
                text: "Hel".into(),
                usage: UsageSummary::default(),
            }),
        };
        assert!(err.is_retryable());
        assert_eq!(err.partial_output().map(|p| p.text.as_str()), Some("Hel"));
    }
}
