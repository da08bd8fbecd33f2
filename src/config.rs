//! Centralized configuration for the telemetry hub
//!
//! Each subsystem gets its own config struct with documented defaults;
//! `HubConfig::validate` runs at construction and rejects values the
//! runtime cannot honor. There are no partially-applied configs: a
//! service is built from one validated `HubConfig`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::alerting::AlertingConfig;
use crate::error::{Error, Result};

/// Retention and throughput policy for a single channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPolicy {
    pub name: String,
    /// How long replayable history is kept
    pub retention: Duration,
    /// Publishes accepted per minute before drop-newest kicks in
    pub rate_limit_per_minute: u32,
}

impl ChannelPolicy {
    pub fn new(name: impl Into<String>, retention_hours: u64, rate_limit_per_minute: u32) -> Self {
        Self {
            name: name.into(),
            retention: Duration::from_secs(retention_hours * 3600),
            rate_limit_per_minute,
        }
    }
}

/// Channel broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Channels created at startup
    pub default_channels: Vec<ChannelPolicy>,
    /// Policy applied to channels created ad hoc (e.g. `logs.<service>`)
    pub adhoc_retention: Duration,
    pub adhoc_rate_limit_per_minute: u32,
    /// Hard cap on replay buffer length per channel
    pub max_replay_messages: usize,
    /// Control messages (subscribe/unsubscribe/heartbeat) per connection
    /// per 60s window
    pub control_rate_limit_per_minute: u32,
    /// Control messages carrying a timestamp older than this are rejected
    pub control_message_max_age: Duration,
    /// Registrations past this count are refused at accept time
    pub max_connections: usize,
    /// Outbound queue depth per connection before sends are skipped
    pub connection_queue_depth: usize,
    /// Server-initiated heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Whether subscribe requires a completed auth handshake
    pub require_auth: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_channels: default_channel_policies(),
            adhoc_retention: Duration::from_secs(24 * 3600),
            adhoc_rate_limit_per_minute: 1000,
            max_replay_messages: 1000,
            control_rate_limit_per_minute: 120,
            control_message_max_age: Duration::from_secs(300),
            max_connections: 10_000,
            connection_queue_depth: 256,
            heartbeat_interval: Duration::from_secs(30),
            require_auth: false,
        }
    }
}

/// The channel set every deployment starts with
pub fn default_channel_policies() -> Vec<ChannelPolicy> {
    vec![
        ChannelPolicy::new("logs.all", 24, 1000),
        ChannelPolicy::new("logs.errors", 168, 500),
        ChannelPolicy::new("logs.business", 72, 100),
        ChannelPolicy::new("logs.security", 720, 200),
        ChannelPolicy::new("metrics", 24, 2000),
        ChannelPolicy::new("traces", 12, 500),
        ChannelPolicy::new("alerts.info", 24, 100),
        ChannelPolicy::new("alerts.warning", 72, 200),
        ChannelPolicy::new("alerts.error", 168, 300),
        ChannelPolicy::new("alerts.critical", 720, 500),
    ]
}

/// Analytics engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Deviation threshold in standard deviations
    pub anomaly_threshold: f64,
    /// Minimum baseline points before the statistical path runs
    pub anomaly_min_points: usize,
    /// Points retained per metric series
    pub series_capacity: usize,
    /// Bounded anomaly registry size
    pub max_anomaly_records: usize,
    /// Error-burst fast path: window scanned for error/fatal logs
    pub error_burst_window: Duration,
    /// Count above which the fast path fires
    pub error_burst_threshold: usize,
    /// Expected count under normal load, reported as the baseline
    pub error_burst_baseline: usize,
    /// Points per trend regression window
    pub trend_window: usize,
    /// Minimum points before a trend is reported
    pub trend_min_points: usize,
    /// |slope| below this is classified flat
    pub trend_flat_slope: f64,
    /// Bounded insight registry size
    pub max_insights: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 3.0,
            anomaly_min_points: 10,
            series_capacity: 500,
            max_anomaly_records: 1000,
            error_burst_window: Duration::from_secs(300),
            error_burst_threshold: 10,
            error_burst_baseline: 2,
            trend_window: 30,
            trend_min_points: 5,
            trend_flat_slope: 0.01,
            max_insights: 500,
        }
    }
}

/// Durable-mirror bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub enabled: bool,
    /// Stream keys take the form `<namespace>:<channel>`
    pub namespace: String,
    /// Per-append deadline; failures are logged and never block fan-out
    pub publish_timeout: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "pulsehub".to_string(),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Dispatch loop and background timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Depth of the ingest queue and of each per-consumer queue
    pub queue_depth: usize,
    /// Rate-window sweep cadence
    pub rate_window_sweep_interval: Duration,
    /// Escalation check cadence
    pub escalation_interval: Duration,
    /// Alert history / throttle-key cleanup cadence
    pub cleanup_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4096,
            rate_window_sweep_interval: Duration::from_secs(60),
            escalation_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(24 * 3600),
        }
    }
}

/// Top-level configuration for a hub instance
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    pub broker: BrokerConfig,
    pub analytics: AnalyticsConfig,
    pub alerting: AlertingConfig,
    pub mirror: MirrorConfig,
    pub service: ServiceConfig,
}

impl HubConfig {
    /// Validate the configuration before any state is built from it
    pub fn validate(&self) -> Result<()> {
        if self.broker.default_channels.is_empty() {
            return Err(Error::Config("default channel set is empty".into()));
        }
        if self.broker.max_connections == 0 {
            return Err(Error::Config("max_connections must be positive".into()));
        }
        if self.broker.connection_queue_depth == 0 {
            return Err(Error::Config("connection_queue_depth must be positive".into()));
        }
        if self.analytics.anomaly_threshold <= 0.0 {
            return Err(Error::Config("anomaly_threshold must be positive".into()));
        }
        if self.analytics.anomaly_min_points < 2 {
            return Err(Error::Config("anomaly_min_points must be at least 2".into()));
        }
        if self.service.queue_depth == 0 {
            return Err(Error::Config("queue_depth must be positive".into()));
        }
        if self.mirror.enabled && self.mirror.namespace.is_empty() {
            return Err(Error::Config("mirror namespace must be set when enabled".into()));
        }
        self.alerting.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_channel_table() {
        let policies = default_channel_policies();
        assert_eq!(policies.len(), 10);

        let security = policies.iter().find(|p| p.name == "logs.security").unwrap();
        assert_eq!(security.retention, Duration::from_secs(720 * 3600));
        assert_eq!(security.rate_limit_per_minute, 200);

        let metrics = policies.iter().find(|p| p.name == "metrics").unwrap();
        assert_eq!(metrics.rate_limit_per_minute, 2000);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = HubConfig::default();
        config.broker.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.analytics.anomaly_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.mirror.enabled = true;
        config.mirror.namespace.clear();
        assert!(config.validate().is_err());
    }
}
