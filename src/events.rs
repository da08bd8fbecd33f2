//! Telemetry event model
//!
//! Every record flowing through the hub is one of the `Event` variants:
//! log records, metric points, trace spans, or alert summaries. Events are
//! immutable after creation and carry the correlation context needed to tie
//! a record back to the request, session, and trace that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Log severity levels, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Whether this level indicates a failure condition
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Delivery priority attached to every outbound channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl From<LogLevel> for MessagePriority {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Fatal => MessagePriority::Urgent,
            LogLevel::Error => MessagePriority::High,
            LogLevel::Warn => MessagePriority::Normal,
            _ => MessagePriority::Low,
        }
    }
}

/// Correlation ids tying an event to the request that produced it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl CorrelationContext {
    pub fn is_empty(&self) -> bool {
        self.request_id.is_none()
            && self.session_id.is_none()
            && self.user_id.is_none()
            && self.trace_id.is_none()
    }

    /// Stable serialized form used for alert throttle keys
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.request_id.as_deref().unwrap_or(""),
            self.session_id.as_deref().unwrap_or(""),
            self.user_id.as_deref().unwrap_or(""),
            self.trace_id.as_deref().unwrap_or(""),
        )
    }
}

/// Structured log record from the logging collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub service: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub context: CorrelationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    pub fn new(level: LogLevel, service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            service: service.into(),
            message: message.into(),
            category: None,
            context: CorrelationContext::default(),
            error: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_context(mut self, context: CorrelationContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Single metric observation from the metrics collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Completed span from the tracing collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub service: String,
    pub start: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: SpanStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Compact alert summary published onto the `alerts.*` channels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// The tagged union carried through the dispatch loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Log(LogEvent),
    Metric(MetricPoint),
    Trace(TraceSpan),
    Alert(AlertEvent),
}

impl Event {
    /// Origin service tag, where the variant carries one
    pub fn service(&self) -> Option<&str> {
        match self {
            Event::Log(e) => Some(&e.service),
            Event::Trace(s) => Some(&s.service),
            Event::Metric(_) | Event::Alert(_) => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Log(e) => e.timestamp,
            Event::Metric(m) => m.timestamp,
            Event::Trace(s) => s.start,
            Event::Alert(a) => a.timestamp,
        }
    }
}
