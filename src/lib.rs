//! PulseHub: real-time telemetry distribution and alerting core
//!
//! The hub ingests structured events (logs, metrics, traces), fans them
//! out to live subscribers over channel-based pub/sub, classifies the
//! stream (patterns, anomalies, trends, business insights), and drives a
//! stateful alert lifecycle with throttling and multi-level escalation.
//!
//! - `broker`: connection management, channel registry, rate limiting,
//!   replay buffers, broadcast fan-out, subscriber control protocol
//! - `analytics`: pattern/anomaly/trend/insight detection
//! - `alerting`: rule engine, alert lifecycle, escalation scheduling,
//!   notification dispatch
//! - `service`: the dispatch loop and background timers tying it together
//!
//! One instance owns all state; there is no cross-process coordination.

pub mod alerting;
pub mod analytics;
pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod mirror;
pub mod service;

pub use alerting::{
    ActiveAlert, AlertRule, AlertSeverity, AlertingSystem, EscalationPolicy, NotificationAttempt,
};
pub use analytics::{
    AnomalyDetector, AnomalyRecord, Insight, InsightGenerator, PatternDetector, PatternRule,
    TrendAnalyzer, TrendRecord,
};
pub use broker::{BroadcastHub, ConnectionId, PublishOutcome, ServerMessage};
pub use config::{BrokerConfig, ChannelPolicy, HubConfig};
pub use error::{Error, Result};
pub use events::{Event, LogEvent, LogLevel, MessagePriority, MetricPoint, TraceSpan};
pub use logging::{init_logging, LoggingConfig};
pub use mirror::{MirrorRecord, StreamMirror};
pub use service::{ServiceStats, TelemetryService};
