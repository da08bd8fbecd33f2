//! Alerting: rule evaluation, lifecycle, escalation, notification
//!
//! `AlertingSystem` coordinates the four alerting components. Classified
//! events come in from the analytics side; alerts, escalations, and
//! notification attempts come out. Created alerts are also broadcast so
//! the broker can publish them onto the `alerts.*` channels.

pub mod escalation;
pub mod lifecycle;
pub mod notify;
pub mod rules;
pub mod types;

pub use escalation::{EscalationScheduler, EscalationStep};
pub use lifecycle::{AlertLifecycleManager, AlertStats, TriggerSpec};
pub use notify::{Notification, NotificationDispatcher};
pub use rules::{AlertRuleEngine, TriggerRequest};
pub use types::{
    default_escalation_policy, ActiveAlert, AlertCondition, AlertRule, AlertSeverity,
    AlertingConfig, ChannelSpec, CompareOp, EscalationLevel, EscalationPolicy, LogField,
    NotificationAttempt, NotificationChannelKind, NotificationConfig, TextOp,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::analytics::{AnomalyRecord, Insight, PatternAction, PatternMatch};
use crate::error::Result;
use crate::events::{AlertEvent, LogEvent, MetricPoint};

/// Coordinator for rules, lifecycle, escalation, and notifications
pub struct AlertingSystem {
    rules: Arc<AlertRuleEngine>,
    lifecycle: Arc<AlertLifecycleManager>,
    scheduler: EscalationScheduler,
    dispatcher: Arc<NotificationDispatcher>,
    alert_tx: broadcast::Sender<AlertEvent>,
    /// rule id -> auto-resolve age registered by pattern actions
    auto_resolve: RwLock<HashMap<String, Duration>>,
    pattern_alert_channels: Vec<String>,
    pattern_throttle: Duration,
}

impl AlertingSystem {
    pub fn new(config: AlertingConfig) -> Self {
        let (alert_tx, _) = broadcast::channel(1024);
        Self {
            rules: Arc::new(AlertRuleEngine::new(config.rules.clone())),
            lifecycle: Arc::new(AlertLifecycleManager::new(
                config.max_history,
                config.history_retention,
            )),
            scheduler: EscalationScheduler::new(
                config.policies.clone(),
                config.default_policy_id.clone(),
            ),
            dispatcher: Arc::new(NotificationDispatcher::new(config.notifications.clone())),
            alert_tx,
            auto_resolve: RwLock::new(HashMap::new()),
            pattern_alert_channels: config.pattern_alert_channels,
            pattern_throttle: config.pattern_throttle,
        }
    }

    /// Stream of created alerts, for publication onto broker channels
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_tx.subscribe()
    }

    pub fn rules(&self) -> &Arc<AlertRuleEngine> {
        &self.rules
    }

    pub fn lifecycle(&self) -> &Arc<AlertLifecycleManager> {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Evaluate a log event against the alert rules
    pub async fn process_log(&self, event: &LogEvent) -> Vec<ActiveAlert> {
        let requests = self.rules.evaluate_log(event).await;
        self.fire_all(requests).await
    }

    /// Evaluate a metric point against the alert rules
    pub async fn process_metric(&self, point: &MetricPoint) -> Vec<ActiveAlert> {
        let requests = self.rules.evaluate_metric(point).await;
        self.fire_all(requests).await
    }

    /// Evaluate an anomaly record against the alert rules
    pub async fn process_anomaly(&self, record: &AnomalyRecord) -> Vec<ActiveAlert> {
        let requests = self.rules.evaluate_anomaly(record).await;
        self.fire_all(requests).await
    }

    /// Evaluate an insight against the alert rules
    pub async fn process_insight(&self, insight: &Insight) -> Vec<ActiveAlert> {
        let requests = self.rules.evaluate_insight(insight).await;
        self.fire_all(requests).await
    }

    /// Execute the actions a pattern match emitted
    pub async fn process_pattern(&self, pattern: &PatternMatch) -> Vec<ActiveAlert> {
        let now = Utc::now();
        let mut created = Vec::new();
        for action in &pattern.actions {
            match action {
                PatternAction::Alert { severity } => {
                    let spec = TriggerSpec::from_pattern(
                        pattern,
                        *severity,
                        self.pattern_alert_channels.clone(),
                        self.pattern_throttle,
                    );
                    let policy = self.scheduler.policy_for(None);
                    if let Some(alert) = self.create_alert(spec, policy, now).await {
                        created.push(alert);
                    }
                }
                PatternAction::Suppress { minutes } => {
                    let count = self
                        .lifecycle
                        .suppress_by_rule(&pattern.rule_id, Duration::from_secs(minutes * 60), now)
                        .await;
                    debug!(rule = %pattern.rule_id, count, "pattern suppressed alerts");
                }
                PatternAction::Escalate { level } => {
                    let count = self.lifecycle.promote_rule(&pattern.rule_id, *level, now).await;
                    debug!(rule = %pattern.rule_id, count, "pattern promoted alerts");
                }
                PatternAction::AutoResolve { after_minutes } => {
                    let mut auto = self.auto_resolve.write().await;
                    auto.insert(
                        pattern.rule_id.clone(),
                        Duration::from_secs(after_minutes * 60),
                    );
                }
            }
        }
        created
    }

    async fn fire_all(&self, requests: Vec<TriggerRequest>) -> Vec<ActiveAlert> {
        let now = Utc::now();
        let mut created = Vec::new();
        for request in requests {
            let Some(rule) = self.rules.get_rule(&request.rule_id).await else {
                continue;
            };
            let spec = TriggerSpec::from_rule(&rule, &request);
            let policy = self.scheduler.policy_for(rule.policy_id.as_deref());
            if let Some(alert) = self.create_alert(spec, policy, now).await {
                created.push(alert);
            }
        }
        created
    }

    /// Create an alert (throttle permitting), notify its channels, and
    /// broadcast the creation
    async fn create_alert(
        &self,
        spec: TriggerSpec,
        policy: Option<&EscalationPolicy>,
        now: DateTime<Utc>,
    ) -> Option<ActiveAlert> {
        let channels = spec.channels.clone();
        let alert = self.lifecycle.trigger(spec, policy, now).await?;

        let notification = Notification {
            alert_id: alert.id.clone(),
            title: alert.title.clone(),
            description: alert.description.clone(),
            severity: alert.severity,
            observed: alert.observed,
            threshold: alert.threshold,
        };
        let attempts = self.dispatcher.dispatch(&notification, &channels, None).await;
        if let Err(e) = self.lifecycle.record_attempts(&alert.id, attempts).await {
            warn!(alert = %alert.id, "failed to record attempts: {}", e);
        }

        let _ = self.alert_tx.send(AlertEvent {
            id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            severity: alert.severity.to_string(),
            title: alert.title.clone(),
            description: alert.description.clone(),
            timestamp: alert.triggered_at,
        });

        self.lifecycle.get(&alert.id).await.or(Some(alert))
    }

    pub async fn acknowledge(&self, alert_id: &str, who: &str) -> Result<ActiveAlert> {
        self.lifecycle.acknowledge(alert_id, who, Utc::now()).await
    }

    pub async fn resolve(&self, alert_id: &str) -> Result<ActiveAlert> {
        self.lifecycle.resolve(alert_id, Utc::now()).await
    }

    pub async fn suppress(&self, alert_id: &str, duration: Duration) -> Result<ActiveAlert> {
        self.lifecycle.suppress(alert_id, duration, Utc::now()).await
    }

    /// The periodic escalation check
    pub async fn escalation_tick(&self) -> usize {
        self.escalation_tick_at(Utc::now()).await
    }

    /// Deterministic tick used by tests and the timer task
    pub async fn escalation_tick_at(&self, now: DateTime<Utc>) -> usize {
        // Apply pattern-registered auto-resolution first
        let directives: Vec<(String, Duration)> = {
            let auto = self.auto_resolve.read().await;
            auto.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        for (rule_id, age) in directives {
            let resolved = self.lifecycle.resolve_older_than(&rule_id, age, now).await;
            if !resolved.is_empty() {
                info!(rule = %rule_id, count = resolved.len(), "auto-resolved alerts");
            }
        }

        let due = self.lifecycle.due_for_escalation(now).await;
        let escalations = due.into_iter().map(|alert| async move {
            let policy_id = self
                .rules
                .get_rule(&alert.rule_id)
                .await
                .and_then(|r| r.policy_id);
            let Some(policy) = self.scheduler.policy_for(policy_id.as_deref()) else {
                return false;
            };

            match self.scheduler.advance(&alert, policy, now) {
                Some(step) => {
                    if self
                        .lifecycle
                        .apply_escalation(&alert.id, step.level, step.next_at)
                        .await
                        .is_err()
                    {
                        return false;
                    }
                    let notification = Notification {
                        alert_id: alert.id.clone(),
                        title: escalation::escalated_title(&alert, step.level),
                        description: escalation::escalated_description(&alert, step.level),
                        severity: alert.severity,
                        observed: alert.observed,
                        threshold: alert.threshold,
                    };
                    let attempts = self
                        .dispatcher
                        .dispatch(&notification, &step.channels, Some(step.level))
                        .await;
                    if let Err(e) = self.lifecycle.record_attempts(&alert.id, attempts).await {
                        warn!(alert = %alert.id, "failed to record attempts: {}", e);
                    }
                    info!(alert = %alert.id, level = step.level, "alert escalated");
                    true
                }
                None => {
                    // No further level: stop checking this alert
                    let _ = self
                        .lifecycle
                        .apply_escalation(&alert.id, alert.escalation_level, None)
                        .await;
                    false
                }
            }
        });

        join_all(escalations).await.into_iter().filter(|e| *e).count()
    }

    /// Daily maintenance sweep
    pub async fn cleanup(&self) -> (usize, usize) {
        self.lifecycle.cleanup(Utc::now()).await
    }

    pub async fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.lifecycle.active().await
    }

    pub async fn stats(&self) -> AlertStats {
        self.lifecycle.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnomalyKind;
    use crate::events::LogLevel;

    fn test_config() -> AlertingConfig {
        let mut config = AlertingConfig::default();
        // Email-only channels so tests never touch the network
        config.notifications.channels = vec![
            ChannelSpec {
                name: "ops-slack".to_string(),
                kind: NotificationChannelKind::Email { to: "ops@example.com".to_string() },
                min_severity: None,
            },
            ChannelSpec {
                name: "oncall-primary".to_string(),
                kind: NotificationChannelKind::Email { to: "oncall@example.com".to_string() },
                min_severity: None,
            },
            ChannelSpec {
                name: "oncall-secondary".to_string(),
                kind: NotificationChannelKind::Email { to: "backup@example.com".to_string() },
                min_severity: None,
            },
            ChannelSpec {
                name: "manager".to_string(),
                kind: NotificationChannelKind::Email { to: "mgr@example.com".to_string() },
                min_severity: None,
            },
            ChannelSpec {
                name: "oncall-executive".to_string(),
                kind: NotificationChannelKind::Email { to: "exec@example.com".to_string() },
                min_severity: None,
            },
        ];
        config
    }

    #[tokio::test]
    async fn test_metric_trigger_creates_alert_with_attempts() {
        let system = AlertingSystem::new(test_config());
        let point = MetricPoint::new("api.latency_ms", 1500.0);

        let created = system.process_metric(&point).await;
        assert_eq!(created.len(), 1);
        let alert = &created[0];
        assert_eq!(alert.rule_id, "api-latency");
        assert_eq!(alert.attempts.len(), 1);
        assert!(alert.attempts[0].success);
        assert!(alert.title.contains("API latency"));
    }

    #[tokio::test]
    async fn test_throttle_suppresses_repeat_creation() {
        let system = AlertingSystem::new(test_config());
        let point = MetricPoint::new("api.latency_ms", 1500.0);

        assert_eq!(system.process_metric(&point).await.len(), 1);
        assert_eq!(system.process_metric(&point).await.len(), 0);
        assert_eq!(system.stats().await.total_throttled, 1);
    }

    #[tokio::test]
    async fn test_alert_broadcast_on_creation() {
        let system = AlertingSystem::new(test_config());
        let mut events = system.subscribe();

        let point = MetricPoint::new("api.latency_ms", 1500.0);
        system.process_metric(&point).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.rule_id, "api-latency");
        assert_eq!(event.severity, "warning");
    }

    #[tokio::test]
    async fn test_escalation_walks_policy_levels() {
        let system = AlertingSystem::new(test_config());

        let created = system.process_metric(&MetricPoint::new("api.latency_ms", 1500.0)).await;
        let alert_id = created[0].id.clone();
        let t0 = created[0].triggered_at;

        // Before the due time nothing happens
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(14)).await, 0);

        // Level 1 at t+15m
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(15)).await, 1);
        let alert = system.lifecycle.get(&alert_id).await.unwrap();
        assert_eq!(alert.escalation_level, 1);

        // Level 2 at t+45m
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(45)).await, 1);
        let alert = system.lifecycle.get(&alert_id).await.unwrap();
        assert_eq!(alert.escalation_level, 2);

        // Warning alert is gated below level 3; escalation stops there
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(105)).await, 0);
        let alert = system.lifecycle.get(&alert_id).await.unwrap();
        assert_eq!(alert.escalation_level, 2);
        assert!(alert.next_escalation_at.is_none());

        // Escalation attempts were recorded with their levels
        let levels: Vec<Option<u32>> = alert.attempts.iter().map(|a| a.escalation_level).collect();
        assert!(levels.contains(&Some(1)));
        assert!(levels.contains(&Some(2)));
    }

    #[tokio::test]
    async fn test_error_severity_reaches_last_level_then_stops() {
        let system = AlertingSystem::new(test_config());

        // The error-rate rule fires at Error severity, clearing every gate
        let anomaly = AnomalyRecord {
            id: "an".to_string(),
            metric: "logs.error_rate".to_string(),
            baseline: 2.0,
            observed: 20.0,
            deviation: 10.0,
            confidence: 1.0,
            kind: AnomalyKind::Spike,
            timestamp: Utc::now(),
            context: Default::default(),
        };
        let error_alerts = system.process_anomaly(&anomaly).await;
        let error_alert = error_alerts
            .iter()
            .find(|a| a.rule_id == "error-rate")
            .unwrap();
        let id = error_alert.id.clone();
        let t0 = error_alert.triggered_at;

        system.escalation_tick_at(t0 + chrono::Duration::minutes(15)).await;
        system.escalation_tick_at(t0 + chrono::Duration::minutes(45)).await;
        system.escalation_tick_at(t0 + chrono::Duration::minutes(105)).await;

        let alert = system.lifecycle.get(&id).await.unwrap();
        assert_eq!(alert.escalation_level, 3);
        assert!(alert.next_escalation_at.is_none());

        // A further tick never escalates past the last level
        system.escalation_tick_at(t0 + chrono::Duration::minutes(500)).await;
        let alert = system.lifecycle.get(&id).await.unwrap();
        assert_eq!(alert.escalation_level, 3);
    }

    #[tokio::test]
    async fn test_acknowledge_halts_escalation() {
        let system = AlertingSystem::new(test_config());

        let created = system.process_metric(&MetricPoint::new("api.latency_ms", 1500.0)).await;
        let alert_id = created[0].id.clone();
        let t0 = created[0].triggered_at;

        system.acknowledge(&alert_id, "casey").await.unwrap();

        // Advancing well past the due time increments nothing
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(60)).await, 0);
        let alert = system.lifecycle.get(&alert_id).await.unwrap();
        assert_eq!(alert.escalation_level, 0);
    }

    #[tokio::test]
    async fn test_suppression_pauses_then_resumes() {
        let system = AlertingSystem::new(test_config());

        let created = system.process_metric(&MetricPoint::new("api.latency_ms", 1500.0)).await;
        let alert_id = created[0].id.clone();
        let t0 = created[0].triggered_at;

        // Suppress for 10 minutes starting at t+14
        system
            .lifecycle
            .suppress(&alert_id, Duration::from_secs(600), t0 + chrono::Duration::minutes(14))
            .await
            .unwrap();

        // Due at t+15 but suppressed: no-op
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(15)).await, 0);
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(23)).await, 0);

        // After expiry escalation resumes from the same level
        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(25)).await, 1);
        let alert = system.lifecycle.get(&alert_id).await.unwrap();
        assert_eq!(alert.escalation_level, 1);
    }

    #[tokio::test]
    async fn test_pattern_alert_action() {
        let system = AlertingSystem::new(test_config());
        let event = LogEvent::new(LogLevel::Error, "api", "Database connection failed");
        let detector = crate::analytics::PatternDetector::new();
        let matches = detector.evaluate(&event).await;
        let db_match = matches
            .iter()
            .find(|m| m.rule_id == "database-connection-failure")
            .unwrap();

        let created = system.process_pattern(db_match).await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].rule_id, "database-connection-failure");
        assert_eq!(created[0].severity, AlertSeverity::Critical);

        // Same pattern within the throttle window is deduplicated
        let created_again = system.process_pattern(db_match).await;
        assert!(created_again.is_empty());
    }

    #[tokio::test]
    async fn test_resolved_alert_never_escalates() {
        let system = AlertingSystem::new(test_config());

        let created = system.process_metric(&MetricPoint::new("api.latency_ms", 1500.0)).await;
        let alert_id = created[0].id.clone();
        let t0 = created[0].triggered_at;
        system.resolve(&alert_id).await.unwrap();

        assert_eq!(system.escalation_tick_at(t0 + chrono::Duration::minutes(60)).await, 0);
        assert_eq!(system.stats().await.active, 0);
        assert_eq!(system.stats().await.resolved_history, 1);
    }
}
