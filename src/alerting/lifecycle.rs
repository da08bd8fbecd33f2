//! Alert lifecycle management
//!
//! Owns the state machine for active alerts: throttle-keyed creation,
//! acknowledge/resolve/suppress mutations, escalation bookkeeping, and
//! the bounded history of resolved alerts. Throttling suppresses alert
//! creation only; rule evaluation upstream is never throttled.
//!
//! Every time-sensitive operation takes an explicit `now` so scheduler
//! behavior can be driven deterministically.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{
    new_alert_id, ActiveAlert, AlertRule, AlertSeverity, EscalationPolicy, NotificationAttempt,
};
use super::rules::TriggerRequest;
use crate::analytics::PatternMatch;
use crate::error::{Error, Result};

/// Everything needed to create one alert, from whichever source
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub rule_id: String,
    pub name: String,
    pub severity: AlertSeverity,
    pub channels: Vec<String>,
    pub throttle: Duration,
    pub observed: f64,
    pub threshold: f64,
    pub condition_summary: String,
    pub fingerprint: String,
}

impl TriggerSpec {
    pub fn from_rule(rule: &AlertRule, request: &TriggerRequest) -> Self {
        Self {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            severity: rule.severity,
            channels: rule.channels.clone(),
            throttle: rule.throttle,
            observed: request.observed,
            threshold: request.threshold,
            condition_summary: rule.condition.describe(),
            fingerprint: request.fingerprint.clone(),
        }
    }

    /// Alerts raised by pattern actions carry the pattern's identity and
    /// route to the given channels.
    pub fn from_pattern(
        pattern: &PatternMatch,
        severity_override: Option<AlertSeverity>,
        channels: Vec<String>,
        throttle: Duration,
    ) -> Self {
        Self {
            rule_id: pattern.rule_id.clone(),
            name: pattern.label.clone(),
            severity: severity_override.unwrap_or(pattern.severity),
            channels,
            throttle,
            observed: pattern.confidence,
            threshold: 0.0,
            condition_summary: format!("pattern '{}'", pattern.label),
            fingerprint: if pattern.context.is_empty() {
                pattern.rule_id.clone()
            } else {
                pattern.context.fingerprint()
            },
        }
    }

    fn title(&self) -> String {
        format!("[{}] {}", self.severity.to_string().to_uppercase(), self.name)
    }

    fn description(&self) -> String {
        format!(
            "{}: observed {} against threshold {} ({})",
            self.name, self.observed, self.threshold, self.condition_summary
        )
    }
}

/// Alert statistics for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub active: usize,
    pub active_by_severity: HashMap<String, usize>,
    pub total_triggered: u64,
    pub total_throttled: u64,
    pub resolved_history: usize,
}

/// State machine owner for active alerts
pub struct AlertLifecycleManager {
    active: RwLock<HashMap<String, ActiveAlert>>,
    history: RwLock<VecDeque<ActiveAlert>>,
    /// `<rule id>|<fingerprint>` -> last accepted trigger time
    throttle: DashMap<String, DateTime<Utc>>,
    max_history: usize,
    history_retention: Duration,
    total_triggered: AtomicU64,
    total_throttled: AtomicU64,
}

impl AlertLifecycleManager {
    pub fn new(max_history: usize, history_retention: Duration) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            throttle: DashMap::new(),
            max_history,
            history_retention,
            total_triggered: AtomicU64::new(0),
            total_throttled: AtomicU64::new(0),
        }
    }

    fn throttle_key(rule_id: &str, fingerprint: &str) -> String {
        format!("{}|{}", rule_id, fingerprint)
    }

    /// Create an alert unless an identical (rule, context) trigger was
    /// accepted within the throttle window. Returns the new alert, or
    /// `None` when deduplicated.
    pub async fn trigger(
        &self,
        spec: TriggerSpec,
        policy: Option<&EscalationPolicy>,
        now: DateTime<Utc>,
    ) -> Option<ActiveAlert> {
        let key = Self::throttle_key(&spec.rule_id, &spec.fingerprint);
        let window = chrono::Duration::from_std(spec.throttle).unwrap_or_else(|_| chrono::Duration::zero());

        if let Some(last) = self.throttle.get(&key) {
            if now.signed_duration_since(*last) < window {
                self.total_throttled.fetch_add(1, Ordering::Relaxed);
                debug!(rule = %spec.rule_id, "trigger throttled");
                return None;
            }
        }
        self.throttle.insert(key, now);

        let next_escalation_at = policy
            .and_then(|p| p.level(1))
            .and_then(|l| chrono::Duration::from_std(l.delay).ok())
            .map(|delay| now + delay);

        let alert = ActiveAlert {
            id: new_alert_id(),
            rule_id: spec.rule_id.clone(),
            severity: spec.severity,
            title: spec.title(),
            description: spec.description(),
            observed: spec.observed,
            threshold: spec.threshold,
            context_fingerprint: spec.fingerprint.clone(),
            triggered_at: now,
            escalation_level: 0,
            next_escalation_at,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            suppressed_until: None,
            attempts: Vec::new(),
        };

        {
            let mut active = self.active.write().await;
            active.insert(alert.id.clone(), alert.clone());
        }
        self.total_triggered.fetch_add(1, Ordering::Relaxed);
        info!(alert = %alert.id, rule = %spec.rule_id, severity = %spec.severity, "alert triggered");
        Some(alert)
    }

    /// Acknowledge: halts escalation, the alert stays active
    pub async fn acknowledge(
        &self,
        alert_id: &str,
        who: &str,
        now: DateTime<Utc>,
    ) -> Result<ActiveAlert> {
        let mut active = self.active.write().await;
        let alert = active
            .get_mut(alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        alert.acknowledged_by = Some(who.to_string());
        alert.acknowledged_at = Some(now);
        info!(alert = %alert_id, by = %who, "alert acknowledged");
        Ok(alert.clone())
    }

    /// Resolve: moves the alert to history and clears its timers and
    /// throttle entries
    pub async fn resolve(&self, alert_id: &str, now: DateTime<Utc>) -> Result<ActiveAlert> {
        let mut alert = {
            let mut active = self.active.write().await;
            active
                .remove(alert_id)
                .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?
        };
        alert.resolved_at = Some(now);
        alert.next_escalation_at = None;

        let prefix = format!("{}|", alert.rule_id);
        self.throttle.retain(|key, _| !key.starts_with(&prefix));

        {
            let mut history = self.history.write().await;
            history.push_back(alert.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }
        info!(alert = %alert_id, "alert resolved");
        Ok(alert)
    }

    /// Suppress: pauses escalation until the window expires, then it
    /// resumes from the same level
    pub async fn suppress(
        &self,
        alert_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<ActiveAlert> {
        let until = now
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let mut active = self.active.write().await;
        let alert = active
            .get_mut(alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        alert.suppressed_until = Some(until);
        info!(alert = %alert_id, until = %until, "alert suppressed");
        Ok(alert.clone())
    }

    /// Suppress every active alert owned by a rule (pattern action)
    pub async fn suppress_by_rule(
        &self,
        rule_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let until = now
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let mut active = self.active.write().await;
        let mut count = 0;
        for alert in active.values_mut().filter(|a| a.rule_id == rule_id) {
            alert.suppressed_until = Some(until);
            count += 1;
        }
        count
    }

    /// Make alerts of a rule due for escalation to at least `level` on
    /// the next tick (pattern action)
    pub async fn promote_rule(&self, rule_id: &str, level: u32, now: DateTime<Utc>) -> usize {
        let target_floor = level.saturating_sub(1);
        let mut active = self.active.write().await;
        let mut count = 0;
        for alert in active.values_mut().filter(|a| a.rule_id == rule_id) {
            if alert.escalation_level < level && !alert.is_acknowledged() {
                alert.escalation_level = alert.escalation_level.max(target_floor);
                alert.next_escalation_at = Some(now);
                count += 1;
            }
        }
        count
    }

    /// Resolve alerts of a rule older than `age` (pattern auto-resolve)
    pub async fn resolve_older_than(
        &self,
        rule_id: &str,
        age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<ActiveAlert> {
        let cutoff = now
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        let ids: Vec<String> = {
            let active = self.active.read().await;
            active
                .values()
                .filter(|a| a.rule_id == rule_id && a.triggered_at <= cutoff)
                .map(|a| a.id.clone())
                .collect()
        };
        let mut resolved = Vec::new();
        for id in ids {
            if let Ok(alert) = self.resolve(&id, now).await {
                resolved.push(alert);
            }
        }
        resolved
    }

    /// Record notification attempts against an alert
    pub async fn record_attempts(
        &self,
        alert_id: &str,
        attempts: Vec<NotificationAttempt>,
    ) -> Result<()> {
        let mut active = self.active.write().await;
        let alert = active
            .get_mut(alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        alert.attempts.extend(attempts);
        Ok(())
    }

    /// Advance an alert's escalation bookkeeping
    pub async fn apply_escalation(
        &self,
        alert_id: &str,
        level: u32,
        next_at: Option<DateTime<Utc>>,
    ) -> Result<ActiveAlert> {
        let mut active = self.active.write().await;
        let alert = active
            .get_mut(alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        alert.escalation_level = level;
        alert.next_escalation_at = next_at;
        Ok(alert.clone())
    }

    /// Active alerts whose escalation is due. Resolved alerts can never
    /// appear here: resolve removes them from the active set.
    pub async fn due_for_escalation(&self, now: DateTime<Utc>) -> Vec<ActiveAlert> {
        let active = self.active.read().await;
        active
            .values()
            .filter(|a| a.escalation_due(now))
            .cloned()
            .collect()
    }

    pub async fn get(&self, alert_id: &str) -> Option<ActiveAlert> {
        self.active.read().await.get(alert_id).cloned()
    }

    pub async fn active(&self) -> Vec<ActiveAlert> {
        self.active.read().await.values().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Most recently resolved alerts, newest last
    pub async fn history_recent(&self, count: usize) -> Vec<ActiveAlert> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).cloned().collect()
    }

    /// Daily sweep: drop resolved history and throttle keys older than
    /// the retention period. Returns (history purged, keys purged).
    pub async fn cleanup(&self, now: DateTime<Utc>) -> (usize, usize) {
        let retention = chrono::Duration::from_std(self.history_retention)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        let cutoff = now - retention;

        let history_purged = {
            let mut history = self.history.write().await;
            let before = history.len();
            history.retain(|a| a.resolved_at.map(|t| t > cutoff).unwrap_or(true));
            before - history.len()
        };

        let keys_before = self.throttle.len();
        self.throttle.retain(|_, last| *last > cutoff);
        let keys_purged = keys_before - self.throttle.len();

        if history_purged > 0 || keys_purged > 0 {
            debug!(history_purged, keys_purged, "alert cleanup sweep");
        }
        (history_purged, keys_purged)
    }

    pub async fn stats(&self) -> AlertStats {
        let active = self.active.read().await;
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for alert in active.values() {
            *by_severity.entry(alert.severity.to_string()).or_insert(0) += 1;
        }
        AlertStats {
            active: active.len(),
            active_by_severity: by_severity,
            total_triggered: self.total_triggered.load(Ordering::Relaxed),
            total_throttled: self.total_throttled.load(Ordering::Relaxed),
            resolved_history: self.history.read().await.len(),
        }
    }
}
