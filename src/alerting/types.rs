//! Alert type definitions
//!
//! Core data structures for the alert engine: severities, rule
//! conditions, active alerts, escalation policies, and notification
//! channel configuration.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Alert severity levels
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl AlertSeverity {
    /// Broker channel this severity publishes to
    pub fn channel(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "alerts.info",
            AlertSeverity::Warning => "alerts.warning",
            AlertSeverity::Error => "alerts.error",
            AlertSeverity::Critical => "alerts.critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Comparison operators for numeric conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Ge => value >= threshold,
            CompareOp::Le => value <= threshold,
            CompareOp::Eq => (value - threshold).abs() < f64::EPSILON,
            CompareOp::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// Match operators for text conditions
#[derive(Debug, Clone)]
pub enum TextOp {
    Eq,
    Ne,
    Contains,
    /// Compiled at rule construction
    Matches(Regex),
}

impl TextOp {
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(TextOp::Matches)
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    pub fn evaluate(&self, value: &str, expected: &str) -> bool {
        match self {
            TextOp::Eq => value == expected,
            TextOp::Ne => value != expected,
            TextOp::Contains => value.contains(expected),
            TextOp::Matches(regex) => regex.is_match(value),
        }
    }
}

/// Log fields addressable by text conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogField {
    Message,
    Service,
    Category,
    Level,
}

/// Rule trigger condition
#[derive(Debug, Clone)]
pub enum AlertCondition {
    /// Numeric comparison against a metric name or derived target
    /// (`anomaly.confidence`, `anomaly.deviation`, `insight.relevance`)
    Numeric {
        target: String,
        op: CompareOp,
        threshold: f64,
    },
    /// Text match against a log field
    Text {
        field: LogField,
        op: TextOp,
        value: String,
    },
}

impl AlertCondition {
    /// Human-readable threshold for titles and descriptions
    pub fn describe(&self) -> String {
        match self {
            AlertCondition::Numeric { target, op, threshold } => {
                format!("{} {} {}", target, op.symbol(), threshold)
            }
            AlertCondition::Text { field, value, .. } => {
                format!("{:?} ~ {:?}", field, value)
            }
        }
    }
}

/// Alert rule definition
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    /// Notification channels, in dispatch order
    pub channels: Vec<String>,
    /// Repeat triggers for the same context are deduplicated within this
    pub throttle: Duration,
    pub enabled: bool,
    pub tags: Vec<String>,
    /// Evaluation window and cadence, carried for the status surface
    pub window: Duration,
    pub evaluation_interval: Duration,
    /// Escalation policy; falls back to the configured default
    pub policy_id: Option<String>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: AlertCondition,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition,
            severity,
            channels: Vec::new(),
            throttle: Duration::from_secs(15 * 60),
            enabled: true,
            tags: Vec::new(),
            window: Duration::from_secs(300),
            evaluation_interval: Duration::from_secs(60),
            policy_id: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_throttle_minutes(mut self, minutes: u64) -> Self {
        self.throttle = Duration::from_secs(minutes * 60);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}

/// One recorded notification attempt on an active alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on attempts issued by an escalation, with the level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_level: Option<u32>,
}

/// A triggered alert moving through its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub id: String,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub observed: f64,
    pub threshold: f64,
    pub context_fingerprint: String,
    pub triggered_at: DateTime<Utc>,
    pub escalation_level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_escalation_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed_until: Option<DateTime<Utc>>,
    pub attempts: Vec<NotificationAttempt>,
}

impl ActiveAlert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.suppressed_until.map(|until| now < until).unwrap_or(false)
    }

    /// Whether the escalation scheduler should advance this alert
    pub fn escalation_due(&self, now: DateTime<Utc>) -> bool {
        if self.is_resolved() || self.is_acknowledged() || self.is_suppressed(now) {
            return false;
        }
        self.next_escalation_at.map(|due| now >= due).unwrap_or(false)
    }
}

/// One tier of an escalation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u32,
    pub delay: Duration,
    pub channels: Vec<String>,
    /// Only escalate alerts at or above this severity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<AlertSeverity>,
}

/// Ordered escalation tiers, looked up per rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub id: String,
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    pub fn level(&self, n: u32) -> Option<&EscalationLevel> {
        self.levels.iter().find(|l| l.level == n)
    }

    pub fn max_level(&self) -> u32 {
        self.levels.iter().map(|l| l.level).max().unwrap_or(0)
    }
}

/// The escalation ladder every deployment starts with
pub fn default_escalation_policy() -> EscalationPolicy {
    EscalationPolicy {
        id: "default".to_string(),
        levels: vec![
            EscalationLevel {
                level: 1,
                delay: Duration::from_secs(15 * 60),
                channels: vec!["oncall-primary".to_string()],
                min_severity: None,
            },
            EscalationLevel {
                level: 2,
                delay: Duration::from_secs(30 * 60),
                channels: vec!["oncall-secondary".to_string(), "manager".to_string()],
                min_severity: None,
            },
            EscalationLevel {
                level: 3,
                delay: Duration::from_secs(60 * 60),
                channels: vec!["oncall-executive".to_string()],
                min_severity: Some(AlertSeverity::Error),
            },
        ],
    }
}

/// Notification transport kinds, the closed sender set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationChannelKind {
    Email { to: String },
    Slack { webhook_url: String },
    Webhook { url: String, #[serde(default)] headers: HashMap<String, String> },
    Sms { phone_number: String },
    PagerDuty { integration_key: String },
}

/// Named, filterable notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: NotificationChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<AlertSeverity>,
}

/// Notification dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub channels: Vec<ChannelSpec>,
    /// Per-send deadline
    pub send_timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelSpec {
                    name: "ops-slack".to_string(),
                    kind: NotificationChannelKind::Slack {
                        webhook_url: std::env::var("PULSEHUB_SLACK_WEBHOOK")
                            .unwrap_or_else(|_| "http://localhost:8080/alerts".to_string()),
                    },
                    min_severity: Some(AlertSeverity::Warning),
                },
                ChannelSpec {
                    name: "oncall-primary".to_string(),
                    kind: NotificationChannelKind::Email {
                        to: "oncall@pulsehub.io".to_string(),
                    },
                    min_severity: None,
                },
                ChannelSpec {
                    name: "oncall-secondary".to_string(),
                    kind: NotificationChannelKind::Email {
                        to: "oncall-backup@pulsehub.io".to_string(),
                    },
                    min_severity: None,
                },
                ChannelSpec {
                    name: "manager".to_string(),
                    kind: NotificationChannelKind::Email {
                        to: "eng-manager@pulsehub.io".to_string(),
                    },
                    min_severity: None,
                },
                ChannelSpec {
                    name: "oncall-executive".to_string(),
                    kind: NotificationChannelKind::PagerDuty {
                        integration_key: std::env::var("PULSEHUB_PAGERDUTY_KEY")
                            .unwrap_or_default(),
                    },
                    min_severity: Some(AlertSeverity::Error),
                },
            ],
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Alerting subsystem configuration
#[derive(Debug, Clone)]
pub struct AlertingConfig {
    pub rules: Vec<AlertRule>,
    pub policies: Vec<EscalationPolicy>,
    pub default_policy_id: String,
    pub notifications: NotificationConfig,
    /// Resolved history and throttle keys older than this are purged
    pub history_retention: Duration,
    pub max_history: usize,
    /// Channels for alerts raised by pattern actions
    pub pattern_alert_channels: Vec<String>,
    /// Throttle window for pattern-raised alerts
    pub pattern_throttle: Duration,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            rules: Self::default_rules(),
            policies: vec![default_escalation_policy()],
            default_policy_id: "default".to_string(),
            notifications: NotificationConfig::default(),
            history_retention: Duration::from_secs(30 * 24 * 3600),
            max_history: 1000,
            pattern_alert_channels: vec!["ops-slack".to_string()],
            pattern_throttle: Duration::from_secs(15 * 60),
        }
    }
}

impl AlertingConfig {
    pub fn default_rules() -> Vec<AlertRule> {
        vec![
            AlertRule::new(
                "error-rate",
                "High error rate",
                AlertCondition::Numeric {
                    target: "logs.error_rate".to_string(),
                    op: CompareOp::Gt,
                    threshold: 10.0,
                },
                AlertSeverity::Error,
            )
            .with_channels(vec!["ops-slack".to_string()])
            .with_throttle_minutes(15)
            .with_tags(vec!["errors".to_string(), "reliability".to_string()]),
            AlertRule::new(
                "api-latency",
                "API latency above SLO",
                AlertCondition::Numeric {
                    target: "api.latency_ms".to_string(),
                    op: CompareOp::Gt,
                    threshold: 1000.0,
                },
                AlertSeverity::Warning,
            )
            .with_channels(vec!["ops-slack".to_string()])
            .with_throttle_minutes(30)
            .with_tags(vec!["latency".to_string(), "performance".to_string()]),
            AlertRule::new(
                "confident-anomaly",
                "High-confidence anomaly",
                AlertCondition::Numeric {
                    target: "anomaly.confidence".to_string(),
                    op: CompareOp::Ge,
                    threshold: 0.9,
                },
                AlertSeverity::Warning,
            )
            .with_channels(vec!["ops-slack".to_string()])
            .with_throttle_minutes(30)
            .with_tags(vec!["anomaly".to_string()]),
        ]
    }

    /// Policy for a rule, falling back to the configured default
    pub fn policy_for(&self, rule: &AlertRule) -> Option<&EscalationPolicy> {
        let wanted = rule.policy_id.as_deref().unwrap_or(&self.default_policy_id);
        self.policies.iter().find(|p| p.id == wanted)
    }

    pub fn validate(&self) -> Result<()> {
        if self.policies.iter().all(|p| p.id != self.default_policy_id) {
            return Err(Error::Config(format!(
                "default escalation policy '{}' is not defined",
                self.default_policy_id
            )));
        }
        for policy in &self.policies {
            if policy.levels.is_empty() {
                return Err(Error::Config(format!("policy '{}' has no levels", policy.id)));
            }
            let mut last = 0;
            for level in &policy.levels {
                if level.level <= last {
                    return Err(Error::Config(format!(
                        "policy '{}' levels must be strictly increasing",
                        policy.id
                    )));
                }
                if level.delay.is_zero() {
                    return Err(Error::Config(format!(
                        "policy '{}' level {} has zero delay",
                        policy.id, level.level
                    )));
                }
                last = level.level;
            }
        }
        for rule in &self.rules {
            if rule.id.is_empty() {
                return Err(Error::Config("alert rule with empty id".into()));
            }
            if let Some(policy_id) = &rule.policy_id {
                if self.policies.iter().all(|p| &p.id != policy_id) {
                    return Err(Error::Config(format!(
                        "rule '{}' references unknown policy '{}'",
                        rule.id, policy_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Generate an alert id
pub fn new_alert_id() -> String {
    Uuid::new_v4().to_string()
}
