//! Alert lifecycle end to end: trigger, throttle, escalation timing,
//! acknowledgement, suppression, and resolution, driven with
//! deterministic tick times.

use std::time::Duration;

use chrono::Utc;
use pulsehub::alerting::{
    AlertingConfig, AlertingSystem, ChannelSpec, NotificationChannelKind,
};
use pulsehub::events::MetricPoint;

/// Config whose notification channels never touch the network
fn offline_config() -> AlertingConfig {
    let mut config = AlertingConfig::default();
    config.notifications.channels = ["ops-slack", "oncall-primary", "oncall-secondary", "manager", "oncall-executive"]
        .iter()
        .map(|name| ChannelSpec {
            name: name.to_string(),
            kind: NotificationChannelKind::Email {
                to: format!("{}@example.com", name),
            },
            min_severity: None,
        })
        .collect();
    config
}

fn latency_point() -> MetricPoint {
    MetricPoint::new("api.latency_ms", 2500.0)
}

fn error_rate_anomaly() -> pulsehub::AnomalyRecord {
    pulsehub::AnomalyRecord {
        id: "burst".to_string(),
        metric: "logs.error_rate".to_string(),
        baseline: 2.0,
        observed: 25.0,
        deviation: 12.5,
        confidence: 1.0,
        kind: pulsehub::analytics::AnomalyKind::Spike,
        timestamp: Utc::now(),
        context: Default::default(),
    }
}

#[tokio::test]
async fn throttle_dedup_allows_one_alert_per_window() {
    let system = AlertingSystem::new(offline_config());

    // Two identical triggers inside the 30-minute throttle window
    assert_eq!(system.process_metric(&latency_point()).await.len(), 1);
    assert_eq!(system.process_metric(&latency_point()).await.len(), 0);

    let stats = system.stats().await;
    assert_eq!(stats.total_triggered, 1);
    assert_eq!(stats.total_throttled, 1);
    assert_eq!(stats.active, 1);
}

#[tokio::test]
async fn escalation_reaches_each_level_on_schedule() {
    let system = AlertingSystem::new(offline_config());

    // error-rate rule: severity error, passes every policy gate
    let created = system.process_anomaly(&error_rate_anomaly()).await;
    let alert = created.iter().find(|a| a.rule_id == "error-rate").unwrap();
    let id = alert.id.clone();
    let t0 = alert.triggered_at;
    assert_eq!(alert.escalation_level, 0);

    let minutes = |m: i64| t0 + chrono::Duration::minutes(m);

    // Not due yet
    system.escalation_tick_at(minutes(14)).await;
    assert_eq!(system.lifecycle().get(&id).await.unwrap().escalation_level, 0);

    // Level 1 at t+15m, level 2 at t+45m, level 3 at t+105m
    system.escalation_tick_at(minutes(15)).await;
    assert_eq!(system.lifecycle().get(&id).await.unwrap().escalation_level, 1);

    system.escalation_tick_at(minutes(45)).await;
    assert_eq!(system.lifecycle().get(&id).await.unwrap().escalation_level, 2);

    system.escalation_tick_at(minutes(105)).await;
    let alert = system.lifecycle().get(&id).await.unwrap();
    assert_eq!(alert.escalation_level, 3);

    // No level 4 exists: escalation stops, the alert stays active
    system.escalation_tick_at(minutes(1000)).await;
    let alert = system.lifecycle().get(&id).await.unwrap();
    assert_eq!(alert.escalation_level, 3);
    assert!(alert.next_escalation_at.is_none());

    // Each escalation notified that level's channels
    let escalated: Vec<&str> = alert
        .attempts
        .iter()
        .filter(|a| a.escalation_level.is_some())
        .map(|a| a.channel.as_str())
        .collect();
    assert!(escalated.contains(&"oncall-primary"));
    assert!(escalated.contains(&"oncall-secondary"));
    assert!(escalated.contains(&"manager"));
    assert!(escalated.contains(&"oncall-executive"));
}

#[tokio::test]
async fn acknowledged_alert_never_escalates() {
    let system = AlertingSystem::new(offline_config());

    let created = system.process_metric(&latency_point()).await;
    let id = created[0].id.clone();
    let t0 = created[0].triggered_at;

    system.acknowledge(&id, "casey").await.unwrap();
    system.escalation_tick_at(t0 + chrono::Duration::minutes(120)).await;

    let alert = system.lifecycle().get(&id).await.unwrap();
    assert_eq!(alert.escalation_level, 0);
    assert_eq!(alert.acknowledged_by.as_deref(), Some("casey"));
}

#[tokio::test]
async fn suppression_pauses_and_resumes_at_same_level() {
    let system = AlertingSystem::new(offline_config());

    let created = system.process_metric(&latency_point()).await;
    let id = created[0].id.clone();
    let t0 = created[0].triggered_at;

    // Suppress for 10 minutes just before the first due time
    system
        .lifecycle()
        .suppress(&id, Duration::from_secs(600), t0 + chrono::Duration::minutes(14))
        .await
        .unwrap();

    system.escalation_tick_at(t0 + chrono::Duration::minutes(16)).await;
    system.escalation_tick_at(t0 + chrono::Duration::minutes(23)).await;
    assert_eq!(system.lifecycle().get(&id).await.unwrap().escalation_level, 0);

    system.escalation_tick_at(t0 + chrono::Duration::minutes(25)).await;
    assert_eq!(system.lifecycle().get(&id).await.unwrap().escalation_level, 1);
}

#[tokio::test]
async fn resolve_moves_alert_to_history_and_out_of_escalation() {
    let system = AlertingSystem::new(offline_config());

    let created = system.process_metric(&latency_point()).await;
    let id = created[0].id.clone();
    let t0 = created[0].triggered_at;

    let resolved = system.resolve(&id).await.unwrap();
    assert!(resolved.is_resolved());

    system.escalation_tick_at(t0 + chrono::Duration::minutes(120)).await;
    let stats = system.stats().await;
    assert_eq!(stats.active, 0);
    assert_eq!(stats.resolved_history, 1);

    // Resolving again reports the alert as unknown
    assert!(system.resolve(&id).await.is_err());
}

#[tokio::test]
async fn notification_attempts_recorded_per_channel() {
    let mut config = offline_config();
    // One rule channel is deliberately unconfigured
    config.rules[0].channels = vec!["ops-slack".to_string(), "missing-channel".to_string()];
    let system = AlertingSystem::new(config);

    let created = system.process_anomaly(&error_rate_anomaly()).await;
    let alert = created.iter().find(|a| a.rule_id == "error-rate").unwrap();

    assert_eq!(alert.attempts.len(), 2);
    let ok = alert.attempts.iter().find(|a| a.channel == "ops-slack").unwrap();
    assert!(ok.success);
    let missing = alert
        .attempts
        .iter()
        .find(|a| a.channel == "missing-channel")
        .unwrap();
    assert!(!missing.success);
    assert!(missing.error.is_some());
}
