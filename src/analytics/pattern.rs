//! Pattern detector
//!
//! Matches incoming log events against a registry of rules. A rule with
//! a regex matches at confidence 0.9; one with only a substring matches
//! case-insensitively at confidence 0.7. Matches bump the rule's
//! frequency counter (never reset during the process lifetime), stamp
//! last-seen, land in a bounded 24-hour window, and emit the rule's
//! configured actions for the alert engine to consume.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use crate::alerting::AlertSeverity;
use crate::error::{Error, Result};
use crate::events::{CorrelationContext, LogEvent};

/// Side effects a matching rule asks for, executed by the alert engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PatternAction {
    /// Raise an alert, optionally overriding the rule severity
    Alert { severity: Option<AlertSeverity> },
    /// Suppress matching alerts for a period
    Suppress { minutes: u64 },
    /// Jump matching alerts straight to an escalation level
    Escalate { level: u32 },
    /// Auto-resolve matching alerts after a period
    AutoResolve { after_minutes: u64 },
}

#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    Substring(String),
}

/// One registered pattern rule with its running state
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub id: String,
    pub label: String,
    matcher: Matcher,
    pub severity: AlertSeverity,
    pub category: String,
    pub actions: Vec<PatternAction>,
    pub frequency: u64,
    pub last_seen: Option<DateTime<Utc>>,
    matches: VecDeque<DateTime<Utc>>,
}

impl PatternRule {
    /// Rule matching via regex (match confidence 0.9)
    pub fn with_regex(
        id: impl Into<String>,
        label: impl Into<String>,
        pattern: &str,
        severity: AlertSeverity,
        category: impl Into<String>,
    ) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))?;
        Ok(Self {
            id: id.into(),
            label: label.into(),
            matcher: Matcher::Pattern(regex),
            severity,
            category: category.into(),
            actions: vec![PatternAction::Alert { severity: None }],
            frequency: 0,
            last_seen: None,
            matches: VecDeque::new(),
        })
    }

    /// Rule matching via case-insensitive substring (match confidence 0.7)
    pub fn with_substring(
        id: impl Into<String>,
        label: impl Into<String>,
        needle: impl Into<String>,
        severity: AlertSeverity,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            matcher: Matcher::Substring(needle.into().to_lowercase()),
            severity,
            category: category.into(),
            actions: vec![PatternAction::Alert { severity: None }],
            frequency: 0,
            last_seen: None,
            matches: VecDeque::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<PatternAction>) -> Self {
        self.actions = actions;
        self
    }

    /// Confidence of a match against the message, if any
    fn match_confidence(&self, message: &str) -> Option<f64> {
        match &self.matcher {
            Matcher::Pattern(regex) => regex.is_match(message).then_some(0.9),
            Matcher::Substring(needle) => {
                message.to_lowercase().contains(needle.as_str()).then_some(0.7)
            }
        }
    }

    /// Matches recorded within the trailing 24 hours
    pub fn recent_match_count(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        self.matches.iter().filter(|t| **t > cutoff).count()
    }

    fn record_match(&mut self, at: DateTime<Utc>) {
        self.frequency += 1;
        self.last_seen = Some(at);
        self.matches.push_back(at);
        let cutoff = at - chrono::Duration::hours(24);
        while let Some(front) = self.matches.front() {
            if *front < cutoff {
                self.matches.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Result of a rule matching one log event
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub rule_id: String,
    pub label: String,
    pub confidence: f64,
    pub severity: AlertSeverity,
    pub category: String,
    pub actions: Vec<PatternAction>,
    pub event_id: String,
    pub message: String,
    pub context: CorrelationContext,
    pub timestamp: DateTime<Utc>,
}

/// Registry of pattern rules, evaluated against every log event
pub struct PatternDetector {
    rules: RwLock<HashMap<String, PatternRule>>,
}

impl PatternDetector {
    /// Detector loaded with the default rule set
    pub fn new() -> Self {
        let mut rules = HashMap::new();
        for rule in Self::default_rules() {
            rules.insert(rule.id.clone(), rule);
        }
        Self { rules: RwLock::new(rules) }
    }

    /// Empty detector for callers that manage their own rules
    pub fn empty() -> Self {
        Self { rules: RwLock::new(HashMap::new()) }
    }

    /// The rule set every deployment starts with
    pub fn default_rules() -> Vec<PatternRule> {
        vec![
            PatternRule::with_regex(
                "database-connection-failure",
                "Database connection failure",
                r"(?i)database connection (failed|refused|lost|timed? ?out)",
                AlertSeverity::Critical,
                "infrastructure",
            )
            .expect("default pattern"),
            PatternRule::with_regex(
                "high-memory",
                "High memory usage",
                r"(?i)(out of memory|memory (usage|limit) (high|exceeded)|heap exhausted)",
                AlertSeverity::Warning,
                "performance",
            )
            .expect("default pattern"),
            PatternRule::with_regex(
                "auth-failure",
                "Authentication failure",
                r"(?i)(authentication failed|invalid credentials|unauthorized access)",
                AlertSeverity::Error,
                "security",
            )
            .expect("default pattern")
            .with_actions(vec![
                PatternAction::Alert { severity: None },
                PatternAction::Escalate { level: 1 },
            ]),
            PatternRule::with_regex(
                "payment-error",
                "Payment processing error",
                r"(?i)payment .*(failed|declined|error)",
                AlertSeverity::Error,
                "business",
            )
            .expect("default pattern"),
            PatternRule::with_regex(
                "ai-inference-timeout",
                "AI inference timeout",
                r"(?i)(inference|model) .*(timed out|timeout)",
                AlertSeverity::Warning,
                "ai",
            )
            .expect("default pattern")
            .with_actions(vec![
                PatternAction::Alert { severity: None },
                PatternAction::AutoResolve { after_minutes: 30 },
            ]),
        ]
    }

    /// Register a rule at runtime; replaces any rule with the same id
    pub async fn add_rule(&self, rule: PatternRule) {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.clone(), rule);
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().await;
        rules
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| Error::PatternNotFound(rule_id.to_string()))
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Evaluate one log event against every registered rule
    pub async fn evaluate(&self, event: &LogEvent) -> Vec<PatternMatch> {
        let mut rules = self.rules.write().await;
        let mut matches = Vec::new();
        for rule in rules.values_mut() {
            let Some(confidence) = rule.match_confidence(&event.message) else {
                continue;
            };
            rule.record_match(event.timestamp);
            debug!(rule = %rule.id, confidence, "pattern matched");
            matches.push(PatternMatch {
                rule_id: rule.id.clone(),
                label: rule.label.clone(),
                confidence,
                severity: rule.severity,
                category: rule.category.clone(),
                actions: rule.actions.clone(),
                event_id: event.id.clone(),
                message: event.message.clone(),
                context: event.context.clone(),
                timestamp: event.timestamp,
            });
        }
        matches
    }

    /// Frequency snapshot for the status surface
    pub async fn frequencies(&self) -> HashMap<String, u64> {
        let rules = self.rules.read().await;
        rules.values().map(|r| (r.id.clone(), r.frequency)).collect()
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;

    fn log(message: &str) -> LogEvent {
        LogEvent::new(LogLevel::Error, "api", message)
    }

    #[tokio::test]
    async fn test_default_db_rule_matches_with_regex_confidence() {
        let detector = PatternDetector::new();
        let matches = detector.evaluate(&log("Database connection failed")).await;

        let m = matches
            .iter()
            .find(|m| m.rule_id == "database-connection-failure")
            .expect("db rule should match");
        assert_eq!(m.confidence, 0.9);
        assert_eq!(m.severity, AlertSeverity::Critical);
        assert_eq!(m.category, "infrastructure");
    }

    #[tokio::test]
    async fn test_substring_rule_matches_with_lower_confidence() {
        let detector = PatternDetector::empty();
        detector
            .add_rule(PatternRule::with_substring(
                "disk-pressure",
                "Disk pressure",
                "Disk Almost Full",
                AlertSeverity::Warning,
                "storage",
            ))
            .await;

        let matches = detector
            .evaluate(&log("warning: disk almost full on /var"))
            .await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].confidence, 0.7);
    }

    #[tokio::test]
    async fn test_no_match_yields_nothing() {
        let detector = PatternDetector::new();
        let matches = detector.evaluate(&log("all quiet on the western front")).await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_frequency_accumulates() {
        let detector = PatternDetector::new();
        for _ in 0..3 {
            detector.evaluate(&log("Database connection refused")).await;
        }
        let frequencies = detector.frequencies().await;
        assert_eq!(frequencies["database-connection-failure"], 3);
    }

    #[tokio::test]
    async fn test_add_and_remove_rule() {
        let detector = PatternDetector::new();
        let before = detector.rule_count().await;

        detector
            .add_rule(PatternRule::with_substring(
                "custom",
                "Custom",
                "weird thing",
                AlertSeverity::Info,
                "misc",
            ))
            .await;
        assert_eq!(detector.rule_count().await, before + 1);

        detector.remove_rule("custom").await.unwrap();
        assert_eq!(detector.rule_count().await, before);
        assert!(matches!(
            detector.remove_rule("custom").await,
            Err(Error::PatternNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_actions_carried_on_match() {
        let detector = PatternDetector::new();
        let matches = detector
            .evaluate(&log("authentication failed for user admin"))
            .await;
        let m = matches.iter().find(|m| m.rule_id == "auth-failure").unwrap();
        assert!(m.actions.contains(&PatternAction::Escalate { level: 1 }));
    }

    #[tokio::test]
    async fn test_invalid_regex_rejected() {
        let result = PatternRule::with_regex(
            "broken",
            "Broken",
            r"([unclosed",
            AlertSeverity::Info,
            "misc",
        );
        assert!(matches!(result, Err(Error::InvalidPattern(_))));
    }
}
