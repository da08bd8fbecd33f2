//! Escalation scheduling
//!
//! Pure planning for the time-driven escalation tick: given an active
//! alert and its policy, decide the next level, the channels to notify,
//! and when the level after that falls due. Escalation stops after the
//! last defined level; the alert then stays active awaiting a human.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::types::{ActiveAlert, EscalationPolicy};

/// One planned escalation advance
#[derive(Debug, Clone)]
pub struct EscalationStep {
    pub level: u32,
    pub channels: Vec<String>,
    pub next_at: Option<DateTime<Utc>>,
}

/// Resolves escalation policies and plans level advances
pub struct EscalationScheduler {
    policies: Vec<EscalationPolicy>,
    default_policy_id: String,
}

impl EscalationScheduler {
    pub fn new(policies: Vec<EscalationPolicy>, default_policy_id: String) -> Self {
        Self { policies, default_policy_id }
    }

    /// Policy for a rule's optional policy id, falling back to default
    pub fn policy_for(&self, policy_id: Option<&str>) -> Option<&EscalationPolicy> {
        let wanted = policy_id.unwrap_or(&self.default_policy_id);
        self.policies.iter().find(|p| p.id == wanted)
    }

    /// Plan the advance for a due alert. `None` means escalation stops:
    /// no further level, or the next level's severity gate filters the
    /// alert out.
    pub fn advance(
        &self,
        alert: &ActiveAlert,
        policy: &EscalationPolicy,
        now: DateTime<Utc>,
    ) -> Option<EscalationStep> {
        let next_level = alert.escalation_level + 1;
        let level = policy.level(next_level)?;

        if let Some(min) = level.min_severity {
            if alert.severity < min {
                debug!(alert = %alert.id, level = next_level, "severity below escalation gate");
                return None;
            }
        }

        let next_at = policy
            .level(next_level + 1)
            .and_then(|l| chrono::Duration::from_std(l.delay).ok())
            .map(|delay| now + delay);

        Some(EscalationStep {
            level: next_level,
            channels: level.channels.clone(),
            next_at,
        })
    }
}

/// Title carried on escalation notifications
pub fn escalated_title(alert: &ActiveAlert, level: u32) -> String {
    format!("[ESCALATED L{}] {}", level, alert.title)
}

/// Description carried on escalation notifications
pub fn escalated_description(alert: &ActiveAlert, level: u32) -> String {
    format!("{} [escalated to level {}]", alert.description, level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::types::{default_escalation_policy, AlertSeverity};

    fn alert_at_level(level: u32, severity: AlertSeverity) -> ActiveAlert {
        ActiveAlert {
            id: "a1".to_string(),
            rule_id: "r1".to_string(),
            severity,
            title: "[ERROR] Test".to_string(),
            description: "Test".to_string(),
            observed: 0.0,
            threshold: 0.0,
            context_fingerprint: String::new(),
            triggered_at: Utc::now(),
            escalation_level: level,
            next_escalation_at: Some(Utc::now()),
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            suppressed_until: None,
            attempts: Vec::new(),
        }
    }

    #[test]
    fn test_advance_walks_levels_then_stops() {
        let scheduler = EscalationScheduler::new(vec![default_escalation_policy()], "default".into());
        let policy = scheduler.policy_for(None).unwrap();
        let now = Utc::now();

        let step1 = scheduler.advance(&alert_at_level(0, AlertSeverity::Error), policy, now).unwrap();
        assert_eq!(step1.level, 1);
        assert_eq!(step1.channels, vec!["oncall-primary"]);
        // Next due time comes from level 2's delay
        assert_eq!(step1.next_at, Some(now + chrono::Duration::minutes(30)));

        let step2 = scheduler.advance(&alert_at_level(1, AlertSeverity::Error), policy, now).unwrap();
        assert_eq!(step2.level, 2);
        assert_eq!(step2.next_at, Some(now + chrono::Duration::minutes(60)));

        let step3 = scheduler.advance(&alert_at_level(2, AlertSeverity::Error), policy, now).unwrap();
        assert_eq!(step3.level, 3);
        assert_eq!(step3.next_at, None);

        // Past the last level escalation stops
        assert!(scheduler.advance(&alert_at_level(3, AlertSeverity::Error), policy, now).is_none());
    }

    #[test]
    fn test_severity_gate_stops_escalation() {
        let scheduler = EscalationScheduler::new(vec![default_escalation_policy()], "default".into());
        let policy = scheduler.policy_for(None).unwrap();
        let now = Utc::now();

        // Level 3 requires Error or above; a Warning alert stops at 2
        assert!(scheduler.advance(&alert_at_level(2, AlertSeverity::Warning), policy, now).is_none());
    }

    #[test]
    fn test_unknown_policy_falls_back_to_none() {
        let scheduler = EscalationScheduler::new(vec![default_escalation_policy()], "default".into());
        assert!(scheduler.policy_for(Some("missing")).is_none());
        assert!(scheduler.policy_for(None).is_some());
    }

    #[test]
    fn test_escalation_annotations() {
        let alert = alert_at_level(0, AlertSeverity::Error);
        assert_eq!(escalated_title(&alert, 2), "[ESCALATED L2] [ERROR] Test");
        assert!(escalated_description(&alert, 2).ends_with("[escalated to level 2]"));
    }
}
