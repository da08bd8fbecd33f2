//! Alert rule engine
//!
//! Evaluates classified events (logs, metric points, anomaly records,
//! insights) against the registered alert rules and emits trigger
//! requests for the lifecycle manager. Evaluation is never throttled;
//! throttling applies only to alert creation downstream.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::{AlertCondition, AlertRule, LogField};
use crate::analytics::{AnomalyRecord, Insight};
use crate::error::{Error, Result};
use crate::events::{LogEvent, MetricPoint};

/// A rule match the lifecycle manager may turn into an alert
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub rule_id: String,
    pub observed: f64,
    pub threshold: f64,
    /// Serialized context, the second half of the throttle key
    pub fingerprint: String,
}

/// Registry of alert rules with explicit update operations
pub struct AlertRuleEngine {
    rules: RwLock<HashMap<String, AlertRule>>,
}

impl AlertRuleEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        let map = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self { rules: RwLock::new(map) }
    }

    pub async fn add_rule(&self, rule: AlertRule) {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.clone(), rule);
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().await;
        rules
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| Error::RuleNotFound(rule_id.to_string()))
    }

    pub async fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.read().await.get(rule_id).cloned()
    }

    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| Error::RuleNotFound(rule_id.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub async fn set_channels(&self, rule_id: &str, channels: Vec<String>) -> Result<()> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| Error::RuleNotFound(rule_id.to_string()))?;
        rule.channels = channels;
        Ok(())
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Evaluate a metric point against all numeric rules targeting it
    pub async fn evaluate_metric(&self, point: &MetricPoint) -> Vec<TriggerRequest> {
        let rules = self.rules.read().await;
        let mut triggers = Vec::new();
        for rule in rules.values().filter(|r| r.enabled) {
            let AlertCondition::Numeric { target, op, threshold } = &rule.condition else {
                continue;
            };
            if target != &point.name || !op.evaluate(point.value, *threshold) {
                continue;
            }
            debug!(rule = %rule.id, value = point.value, "metric rule matched");
            triggers.push(TriggerRequest {
                rule_id: rule.id.clone(),
                observed: point.value,
                threshold: *threshold,
                fingerprint: metric_fingerprint(point),
            });
        }
        triggers
    }

    /// Evaluate a log event against all text rules
    pub async fn evaluate_log(&self, event: &LogEvent) -> Vec<TriggerRequest> {
        let rules = self.rules.read().await;
        let mut triggers = Vec::new();
        for rule in rules.values().filter(|r| r.enabled) {
            let AlertCondition::Text { field, op, value } = &rule.condition else {
                continue;
            };
            let level_text;
            let actual = match field {
                LogField::Message => event.message.as_str(),
                LogField::Service => event.service.as_str(),
                LogField::Category => event.category.as_deref().unwrap_or(""),
                LogField::Level => {
                    level_text = event.level.to_string();
                    level_text.as_str()
                }
            };
            if !op.evaluate(actual, value) {
                continue;
            }
            debug!(rule = %rule.id, "log rule matched");
            let fingerprint = if event.context.is_empty() {
                event.service.clone()
            } else {
                event.context.fingerprint()
            };
            triggers.push(TriggerRequest {
                rule_id: rule.id.clone(),
                observed: 1.0,
                threshold: 1.0,
                fingerprint,
            });
        }
        triggers
    }

    /// Evaluate an anomaly record: rules may target the anomalous metric
    /// itself or the derived `anomaly.*` fields
    pub async fn evaluate_anomaly(&self, record: &AnomalyRecord) -> Vec<TriggerRequest> {
        let rules = self.rules.read().await;
        let mut triggers = Vec::new();
        for rule in rules.values().filter(|r| r.enabled) {
            let AlertCondition::Numeric { target, op, threshold } = &rule.condition else {
                continue;
            };
            let observed = match target.as_str() {
                "anomaly.confidence" => record.confidence,
                "anomaly.deviation" => record.deviation,
                t if t == record.metric => record.observed,
                _ => continue,
            };
            if !op.evaluate(observed, *threshold) {
                continue;
            }
            debug!(rule = %rule.id, metric = %record.metric, "anomaly rule matched");
            triggers.push(TriggerRequest {
                rule_id: rule.id.clone(),
                observed,
                threshold: *threshold,
                fingerprint: record.metric.clone(),
            });
        }
        triggers
    }

    /// Evaluate an insight against rules targeting `insight.relevance`
    pub async fn evaluate_insight(&self, insight: &Insight) -> Vec<TriggerRequest> {
        let rules = self.rules.read().await;
        let mut triggers = Vec::new();
        for rule in rules.values().filter(|r| r.enabled) {
            let AlertCondition::Numeric { target, op, threshold } = &rule.condition else {
                continue;
            };
            if target != "insight.relevance" || !op.evaluate(insight.relevance, *threshold) {
                continue;
            }
            triggers.push(TriggerRequest {
                rule_id: rule.id.clone(),
                observed: insight.relevance,
                threshold: *threshold,
                fingerprint: insight.service.clone(),
            });
        }
        triggers
    }
}

/// Stable fingerprint for a metric point: name plus sorted labels
fn metric_fingerprint(point: &MetricPoint) -> String {
    if point.labels.is_empty() {
        return point.name.clone();
    }
    let mut labels: Vec<_> = point
        .labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    labels.sort();
    format!("{}{{{}}}", point.name, labels.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::types::{AlertSeverity, CompareOp, TextOp};
    use crate::events::LogLevel;

    fn engine() -> AlertRuleEngine {
        AlertRuleEngine::new(vec![
            AlertRule::new(
                "latency",
                "Latency",
                AlertCondition::Numeric {
                    target: "api.latency_ms".to_string(),
                    op: CompareOp::Gt,
                    threshold: 1000.0,
                },
                AlertSeverity::Warning,
            ),
            AlertRule::new(
                "db-log",
                "DB failure logged",
                AlertCondition::Text {
                    field: LogField::Message,
                    op: TextOp::Contains,
                    value: "database".to_string(),
                },
                AlertSeverity::Error,
            ),
        ])
    }

    #[tokio::test]
    async fn test_metric_condition_operators() {
        let engine = engine();
        let hot = MetricPoint::new("api.latency_ms", 1500.0);
        let cool = MetricPoint::new("api.latency_ms", 900.0);
        let other = MetricPoint::new("worker.queue_depth", 1500.0);

        assert_eq!(engine.evaluate_metric(&hot).await.len(), 1);
        assert!(engine.evaluate_metric(&cool).await.is_empty());
        assert!(engine.evaluate_metric(&other).await.is_empty());

        let trigger = &engine.evaluate_metric(&hot).await[0];
        assert_eq!(trigger.rule_id, "latency");
        assert_eq!(trigger.observed, 1500.0);
        assert_eq!(trigger.threshold, 1000.0);
    }

    #[tokio::test]
    async fn test_log_condition() {
        let engine = engine();
        let event = LogEvent::new(LogLevel::Error, "api", "database connection lost");
        let triggers = engine.evaluate_log(&event).await;
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].rule_id, "db-log");
        assert_eq!(triggers[0].fingerprint, "api");
    }

    #[tokio::test]
    async fn test_disabled_rule_skipped() {
        let engine = engine();
        engine.set_enabled("latency", false).await.unwrap();
        let hot = MetricPoint::new("api.latency_ms", 1500.0);
        assert!(engine.evaluate_metric(&hot).await.is_empty());

        engine.set_enabled("latency", true).await.unwrap();
        assert_eq!(engine.evaluate_metric(&hot).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_rule_updates_fail() {
        let engine = engine();
        assert!(matches!(
            engine.set_enabled("ghost", true).await,
            Err(Error::RuleNotFound(_))
        ));
        assert!(matches!(
            engine.set_channels("ghost", vec![]).await,
            Err(Error::RuleNotFound(_))
        ));
        assert!(matches!(
            engine.remove_rule("ghost").await,
            Err(Error::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_anomaly_targets() {
        let engine = AlertRuleEngine::new(vec![AlertRule::new(
            "confident",
            "Confident anomaly",
            AlertCondition::Numeric {
                target: "anomaly.confidence".to_string(),
                op: CompareOp::Ge,
                threshold: 0.9,
            },
            AlertSeverity::Warning,
        )]);

        let record = AnomalyRecord {
            id: "a".to_string(),
            metric: "api.latency_ms".to_string(),
            baseline: 10.0,
            observed: 17.0,
            deviation: 3.5,
            confidence: 1.0,
            kind: crate::analytics::AnomalyKind::Spike,
            timestamp: chrono::Utc::now(),
            context: Default::default(),
        };
        let triggers = engine.evaluate_anomaly(&record).await;
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].fingerprint, "api.latency_ms");
    }

    #[tokio::test]
    async fn test_metric_fingerprint_label_order() {
        let a = MetricPoint::new("m", 1.0)
            .with_label("zone", "us-1")
            .with_label("host", "a");
        let b = MetricPoint::new("m", 1.0)
            .with_label("host", "a")
            .with_label("zone", "us-1");
        assert_eq!(metric_fingerprint(&a), metric_fingerprint(&b));
    }
}
