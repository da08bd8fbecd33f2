//! Channel registry
//!
//! Named topics with their subscriber sets, counters, retention and rate
//! policy, and replay history. Channels are created at startup from the
//! configured default list and ad hoc afterwards (service log channels);
//! they are never deleted during the process lifetime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::replay::{ReplayBuffer, StoredMessage};
use super::ConnectionId;
use crate::config::{BrokerConfig, ChannelPolicy};
use crate::error::{Error, Result};
use crate::events::{LogEvent, LogLevel};

/// Route a log event to its channel: fatal/error beats business beats
/// security beats the per-service fallback.
pub fn route_log_channel(event: &LogEvent) -> String {
    if event.level >= LogLevel::Error {
        return "logs.errors".to_string();
    }
    match event.category.as_deref() {
        Some("business") => "logs.business".to_string(),
        Some("security") => "logs.security".to_string(),
        _ => format!("logs.{}", event.service),
    }
}

struct ChannelEntry {
    policy: ChannelPolicy,
    subscribers: HashSet<ConnectionId>,
    message_count: u64,
    dropped_count: u64,
    last_message_at: Option<DateTime<Utc>>,
    replay: ReplayBuffer,
}

impl ChannelEntry {
    fn new(policy: ChannelPolicy, max_replay: usize) -> Self {
        let replay = ReplayBuffer::new(max_replay, policy.retention);
        Self {
            policy,
            subscribers: HashSet::new(),
            message_count: 0,
            dropped_count: 0,
            last_message_at: None,
            replay,
        }
    }
}

/// Point-in-time view of one channel for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub name: String,
    pub subscribers: usize,
    pub message_count: u64,
    pub dropped_count: u64,
    pub buffered_messages: usize,
    pub rate_limit_per_minute: u32,
    pub retention: Duration,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Registry of all channels known to this hub instance
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, ChannelEntry>>,
    adhoc_retention: Duration,
    adhoc_rate_limit: u32,
    max_replay: usize,
}

impl ChannelRegistry {
    pub fn new(config: &BrokerConfig) -> Self {
        let mut channels = HashMap::new();
        for policy in &config.default_channels {
            channels.insert(
                policy.name.clone(),
                ChannelEntry::new(policy.clone(), config.max_replay_messages),
            );
        }
        info!("channel registry initialized with {} channels", channels.len());

        Self {
            channels: RwLock::new(channels),
            adhoc_retention: config.adhoc_retention,
            adhoc_rate_limit: config.adhoc_rate_limit_per_minute,
            max_replay: config.max_replay_messages,
        }
    }

    /// Create a channel with an explicit policy; no-op when it exists
    pub async fn create_channel(&self, policy: ChannelPolicy) -> bool {
        let mut channels = self.channels.write().await;
        if channels.contains_key(&policy.name) {
            return false;
        }
        debug!(channel = %policy.name, "creating channel");
        channels.insert(policy.name.clone(), ChannelEntry::new(policy, self.max_replay));
        true
    }

    /// Create the channel with ad hoc defaults if it does not exist yet
    pub async fn ensure_channel(&self, name: &str) {
        {
            let channels = self.channels.read().await;
            if channels.contains_key(name) {
                return;
            }
        }
        let policy = ChannelPolicy {
            name: name.to_string(),
            retention: self.adhoc_retention,
            rate_limit_per_minute: self.adhoc_rate_limit,
        };
        self.create_channel(policy).await;
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }

    /// Add a subscriber; returns the resulting subscriber count
    pub async fn add_subscriber(&self, channel: &str, conn: ConnectionId) -> Result<usize> {
        let mut channels = self.channels.write().await;
        let entry = channels
            .get_mut(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        entry.subscribers.insert(conn);
        Ok(entry.subscribers.len())
    }

    /// Remove a subscriber; removing a non-member is a no-op. Returns the
    /// resulting subscriber count, or an error for unknown channels.
    pub async fn remove_subscriber(&self, channel: &str, conn: ConnectionId) -> Result<usize> {
        let mut channels = self.channels.write().await;
        let entry = channels
            .get_mut(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        entry.subscribers.remove(&conn);
        Ok(entry.subscribers.len())
    }

    /// Strip a connection from every channel's subscriber set
    pub async fn remove_subscriber_everywhere(&self, conn: ConnectionId) -> Vec<String> {
        let mut channels = self.channels.write().await;
        let mut removed_from = Vec::new();
        for (name, entry) in channels.iter_mut() {
            if entry.subscribers.remove(&conn) {
                removed_from.push(name.clone());
            }
        }
        removed_from
    }

    pub async fn subscribers(&self, channel: &str) -> Result<Vec<ConnectionId>> {
        let channels = self.channels.read().await;
        let entry = channels
            .get(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        Ok(entry.subscribers.iter().copied().collect())
    }

    pub async fn subscriber_count(&self, channel: &str) -> Result<usize> {
        let channels = self.channels.read().await;
        let entry = channels
            .get(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        Ok(entry.subscribers.len())
    }

    pub async fn rate_limit_of(&self, channel: &str) -> Result<u32> {
        let channels = self.channels.read().await;
        let entry = channels
            .get(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        Ok(entry.policy.rate_limit_per_minute)
    }

    /// Record an accepted publish: bump counters and append to replay
    pub async fn record_publish(&self, message: &StoredMessage) -> Result<()> {
        let mut channels = self.channels.write().await;
        let entry = channels
            .get_mut(&message.channel)
            .ok_or_else(|| Error::ChannelNotFound(message.channel.clone()))?;
        entry.message_count += 1;
        entry.last_message_at = Some(message.timestamp);
        entry.replay.append(message.clone());
        Ok(())
    }

    /// Record a publish dropped by the channel rate limit
    pub async fn record_drop(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get_mut(channel) {
            entry.dropped_count += 1;
        }
    }

    pub async fn replay_since(
        &self,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let channels = self.channels.read().await;
        let entry = channels
            .get(channel)
            .ok_or_else(|| Error::ChannelNotFound(channel.to_string()))?;
        Ok(entry.replay.replay_since(since))
    }

    /// Prune every channel's replay history against its retention window
    pub async fn prune_replay(&self) {
        let now = Utc::now();
        let mut channels = self.channels.write().await;
        for entry in channels.values_mut() {
            entry.replay.prune(now);
        }
    }

    pub async fn channel_names(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn stats(&self) -> Vec<ChannelStats> {
        let channels = self.channels.read().await;
        channels
            .values()
            .map(|entry| ChannelStats {
                name: entry.policy.name.clone(),
                subscribers: entry.subscribers.len(),
                message_count: entry.message_count,
                dropped_count: entry.dropped_count,
                buffered_messages: entry.replay.len(),
                rate_limit_per_minute: entry.policy.rate_limit_per_minute,
                retention: entry.policy.retention,
                last_message_at: entry.last_message_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(&BrokerConfig::default())
    }

    #[test]
    fn test_log_routing_precedence() {
        let fatal = LogEvent::new(LogLevel::Fatal, "api", "boom").with_category("business");
        assert_eq!(route_log_channel(&fatal), "logs.errors");

        let business = LogEvent::new(LogLevel::Info, "api", "checkout done").with_category("business");
        assert_eq!(route_log_channel(&business), "logs.business");

        let security = LogEvent::new(LogLevel::Warn, "api", "odd login").with_category("security");
        assert_eq!(route_log_channel(&security), "logs.security");

        let plain = LogEvent::new(LogLevel::Info, "billing", "tick");
        assert_eq!(route_log_channel(&plain), "logs.billing");
    }

    #[tokio::test]
    async fn test_default_channels_present() {
        let registry = registry();
        assert!(registry.exists("logs.all").await);
        assert!(registry.exists("alerts.critical").await);
        assert_eq!(registry.rate_limit_of("metrics").await.unwrap(), 2000);
        assert!(!registry.exists("logs.billing").await);
    }

    #[tokio::test]
    async fn test_ensure_channel_adhoc() {
        let registry = registry();
        registry.ensure_channel("logs.billing").await;
        assert!(registry.exists("logs.billing").await);
        assert_eq!(registry.rate_limit_of("logs.billing").await.unwrap(), 1000);

        // Second ensure is a no-op
        registry.ensure_channel("logs.billing").await;
    }

    #[tokio::test]
    async fn test_subscriber_membership() {
        let registry = registry();
        let conn = Uuid::new_v4();

        assert_eq!(registry.add_subscriber("logs.all", conn).await.unwrap(), 1);
        assert_eq!(registry.add_subscriber("metrics", conn).await.unwrap(), 1);

        let removed = registry.remove_subscriber_everywhere(conn).await;
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.subscriber_count("logs.all").await.unwrap(), 0);
        assert_eq!(registry.subscriber_count("metrics").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_channel_errors() {
        let registry = registry();
        let conn = Uuid::new_v4();
        assert!(matches!(
            registry.add_subscriber("nope", conn).await,
            Err(Error::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_idempotent() {
        let registry = registry();
        let conn = Uuid::new_v4();
        registry.add_subscriber("logs.all", conn).await.unwrap();
        assert_eq!(registry.remove_subscriber("logs.all", conn).await.unwrap(), 0);
        // Removing again is a quiet no-op
        assert_eq!(registry.remove_subscriber("logs.all", conn).await.unwrap(), 0);
    }
}
