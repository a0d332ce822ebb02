//! Per-turn trace collection.
//!
//! A [`TraceCollector`] lives for exactly one turn. Each call to
//! [`TraceCollector::record`] appends an immutable [`TraceEvent`] stamped with
//! the milliseconds elapsed since the collector's reference instant. The
//! collected events are embedded in the persisted turn record, so the export
//! format is kept compact: `{s, st, p, ms}`.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Maximum characters kept per parameter value.
pub const MAX_PARAM_CHARS: usize = 200;

/// Appended to parameter values that were cut at [`MAX_PARAM_CHARS`].
pub const TRUNCATION_MARKER: char = '…';

/// Outcome of a traced step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Ok,
    Error,
    Cancelled,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Ok => "ok",
            TraceStatus::Error => "error",
            TraceStatus::Cancelled => "cancelled",
        }
    }
}

/// One recorded step. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "s")]
    pub step: String,
    #[serde(rename = "st")]
    pub status: TraceStatus,
    #[serde(rename = "p", default)]
    pub params: BTreeMap<String, String>,
    #[serde(rename = "ms")]
    pub elapsed_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parameter value before compaction. `None` means "null" and is dropped
/// when the event is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValue(Option<String>);

macro_rules! param_from_display {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for ParamValue {
                fn from(v: $t) -> Self {
                    ParamValue(Some(v.to_string()))
                }
            }
        )*
    };
}

param_from_display!(
    String, &str, &String, bool, char, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32,
    f64,
);

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue(None))
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => ParamValue(None),
            serde_json::Value::String(s) => ParamValue(Some(s)),
            other => ParamValue(Some(other.to_string())),
        }
    }
}

/// Ordered builder for the key/value parameters of one trace event.
#[derive(Debug, Clone, Default)]
pub struct TraceParams {
    entries: Vec<(String, ParamValue)>,
}

impl TraceParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Drop nulls, stringify and truncate everything else.
    fn compact(self) -> BTreeMap<String, String> {
        self.entries
            .into_iter()
            .filter_map(|(k, ParamValue(v))| v.map(|v| (k, truncate_param(v))))
            .collect()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for TraceParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn truncate_param(value: String) -> String {
    match value.char_indices().nth(MAX_PARAM_CHARS) {
        Some((cut, _)) => {
            let mut out = value[..cut].to_owned();
            out.push(TRUNCATION_MARKER);
            out
        }
        None => value,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates the ordered trace of a single turn.
#[derive(Debug, Default)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
    started_at: Option<Instant>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reference instant. Calling it again resets the reference.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Append a step. Starts the collector first if nobody did.
    pub fn record(&mut self, step: impl Into<String>, status: TraceStatus, params: TraceParams) {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        let elapsed_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.events.push(TraceEvent {
            step: step.into(),
            status,
            params: params.compact(),
            elapsed_ms,
        });
    }

    /// Shorthand for a successful step.
    pub fn ok(&mut self, step: impl Into<String>, params: TraceParams) {
        self.record(step, TraceStatus::Ok, params);
    }

    /// A fresh, independent copy of the events in insertion order.
    pub fn export(&self) -> Vec<TraceEvent> {
        self.events.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Consume the collector, yielding its events.
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_start_begins_at_zero() {
        let mut trace = TraceCollector::new();
        assert!(!trace.is_started());
        trace.ok("preprocess", TraceParams::new());
        assert!(trace.is_started());
        // The very first event is measured against a reference set in the
        // same call.
        assert!(trace.export()[0].elapsed_ms < 50);
    }

    #[test]
    fn events_keep_insertion_order_and_monotonic_elapsed() {
        let mut trace = TraceCollector::new();
        trace.start();
        for step in ["a", "b", "c", "d"] {
            trace.ok(step, TraceParams::new());
        }
        let events = trace.export();
        let steps: Vec<&str> = events.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, vec!["a", "b", "c", "d"]);
        assert!(events.windows(2).all(|w| w[0].elapsed_ms <= w[1].elapsed_ms));
    }

    #[test]
    fn start_twice_is_not_an_error() {
        let mut trace = TraceCollector::new();
        trace.start();
        trace.start();
        trace.ok("x", TraceParams::new());
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn null_params_are_dropped() {
        let mut trace = TraceCollector::new();
        trace.ok(
            "llm.chat.stream",
            TraceParams::new()
                .with("length", 12usize)
                .with("finish_reason", None::<String>)
                .with("have_usage", true)
                .with("raw", serde_json::Value::Null),
        );
        let event = &trace.export()[0];
        assert_eq!(event.params.len(), 2);
        assert_eq!(event.params["length"], "12");
        assert_eq!(event.params["have_usage"], "true");
        assert!(!event.params.contains_key("finish_reason"));
        assert!(!event.params.contains_key("raw"));
    }

    #[test]
    fn long_params_truncate_to_limit_plus_marker() {
        let long = "x".repeat(MAX_PARAM_CHARS + 50);
        let exact = "y".repeat(MAX_PARAM_CHARS);
        let mut trace = TraceCollector::new();
        trace.ok(
            "preprocess",
            TraceParams::new().with("long", long).with("exact", exact.clone()),
        );
        let params = &trace.export()[0].params;
        assert_eq!(params["long"].chars().count(), MAX_PARAM_CHARS + 1);
        assert!(params["long"].ends_with(TRUNCATION_MARKER));
        assert!(params["long"].starts_with(&"x".repeat(MAX_PARAM_CHARS)));
        assert_eq!(params["exact"], exact);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let wide = "é".repeat(MAX_PARAM_CHARS + 1);
        let mut trace = TraceCollector::new();
        trace.ok("x", TraceParams::new().with("wide", wide));
        let value = &trace.export()[0].params["wide"];
        assert_eq!(value.chars().count(), MAX_PARAM_CHARS + 1);
        assert!(value.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn export_is_independent_per_call() {
        let mut trace = TraceCollector::new();
        trace.ok("a", TraceParams::new());
        let first = trace.export();
        trace.ok("b", TraceParams::new());
        let second = trace.export();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn export_uses_compact_keys() {
        let mut trace = TraceCollector::new();
        trace.record(
            "llm.chat.stream",
            TraceStatus::Error,
            [("reason", "reset")].into_iter().collect(),
        );
        let json = serde_json::to_value(trace.export()).unwrap();
        let entry = &json[0];
        assert_eq!(entry["s"], "llm.chat.stream");
        assert_eq!(entry["st"], "error");
        assert_eq!(entry["p"]["reason"], "reset");
        assert!(entry["ms"].is_u64());
    }
}
