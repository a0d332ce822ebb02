//! Reduce a fragment stream to final text plus usage.
//!
//! Text fragments are appended in arrival order and echoed to an optional
//! [`DeltaSink`]. Usage fragments overwrite the running summary, so the last
//! one wins. A transport error, a cancellation, or an idle gap longer than
//! the configured timeout ends the drain with
//! [`Error::StreamInterrupted`] carrying everything collected so far.

use std::time::Duration;

use futures_util::StreamExt;

use ct_domain::error::{Error, Result};
use ct_domain::stream::{Accumulated, BoxStream, Fragment};

use super::cancel::CancelToken;

/// Receives each non-empty text increment as it arrives.
pub type DeltaSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Why a drain ended before the stream was exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    Transport(String),
    Cancelled,
    IdleTimeout(Duration),
}

impl Interruption {
    pub fn reason(&self) -> String {
        match self {
            Interruption::Transport(reason) => reason.clone(),
            Interruption::Cancelled => "cancelled".into(),
            Interruption::IdleTimeout(d) => format!("no fragment for {} ms", d.as_millis()),
        }
    }
}

pub struct StreamAccumulator<'a> {
    acc: Accumulated,
    sink: Option<DeltaSink<'a>>,
    cancel: Option<CancelToken>,
    idle_timeout: Option<Duration>,
}

impl<'a> StreamAccumulator<'a> {
    pub fn new() -> Self {
        Self {
            acc: Accumulated::default(),
            sink: None,
            cancel: None,
            idle_timeout: None,
        }
    }

    pub fn with_sink(mut self, sink: DeltaSink<'a>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Longest wait tolerated for any single fragment. Zero disables.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Fold one fragment into the running state.
    pub fn push(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Text { text } if !text.is_empty() => {
                if let Some(sink) = self.sink.as_mut() {
                    sink(&text);
                }
                self.acc.text.push_str(&text);
            }
            Fragment::Usage { usage } => self.acc.usage = usage,
            Fragment::Text { .. } | Fragment::Empty => {}
        }
    }

    /// What has been collected so far.
    pub fn snapshot(&self) -> &Accumulated {
        &self.acc
    }

    /// Drain `stream` to the end.
    pub async fn drain(mut self, mut stream: BoxStream<'_, Result<Fragment>>) -> Result<Accumulated> {
        loop {
            match next_fragment(&mut stream, self.cancel.as_ref(), self.idle_timeout).await {
                Ok(Some(fragment)) => self.push(fragment),
                Ok(None) => return Ok(self.acc),
                Err(why) => {
                    tracing::debug!(
                        reason = %why.reason(),
                        partial_chars = self.acc.text.chars().count(),
                        "stream interrupted"
                    );
                    return Err(Error::StreamInterrupted {
                        reason: why.reason(),
                        partial: Box::new(self.acc),
                    });
                }
            }
        }
    }
}

async fn next_fragment(
    stream: &mut BoxStream<'_, Result<Fragment>>,
    cancel: Option<&CancelToken>,
    idle_timeout: Option<Duration>,
) -> std::result::Result<Option<Fragment>, Interruption> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(Interruption::Cancelled);
    }

    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };
    let idle = async {
        match idle_timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(Interruption::Cancelled),
        item = stream.next() => match item {
            Some(Ok(fragment)) => Ok(Some(fragment)),
            Some(Err(e)) => Err(Interruption::Transport(e.to_string())),
            None => Ok(None),
        },
        _ = idle => Err(Interruption::IdleTimeout(idle_timeout.unwrap_or_default())),
    }
}

impl Default for StreamAccumulator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain `stream` with no sink, cancellation, or timeout.
pub async fn accumulate(stream: BoxStream<'_, Result<Fragment>>) -> Result<Accumulated> {
    StreamAccumulator::new().drain(stream).await
}
