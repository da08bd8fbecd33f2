//! Broadcast hub
//!
//! Routes outbound messages to a channel's subscribers, maintains replay
//! history, applies per-channel publish rate limits (drop-newest), and
//! optionally mirrors accepted messages to an external durable stream.
//! Also the entry point for the subscriber control protocol.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{ConnectionManager, ConnectionStats, DeliveryResult};
use super::protocol::{parse_client_message, ServerMessage};
use super::rate_limit::FixedWindowLimiter;
use super::registry::{ChannelRegistry, ChannelStats};
use super::replay::StoredMessage;
use super::ConnectionId;
use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::events::MessagePriority;
use crate::mirror::{MirrorRecord, StreamMirror};

/// Outcome of a publish call. Rate-limited publishes are not errors;
/// the message is silently dropped by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { subscribers: usize },
    RateLimited,
}

/// Aggregate view for the health/status surface
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub control_violations: u64,
    pub publish_violations: u64,
    pub channels: Vec<ChannelStats>,
}

/// The channel broker: connection manager, registry, and fan-out
pub struct BroadcastHub {
    registry: Arc<ChannelRegistry>,
    connections: Arc<ConnectionManager>,
    publish_limiter: FixedWindowLimiter,
    mirror: Option<Arc<dyn StreamMirror>>,
    mirror_namespace: String,
    mirror_timeout: Duration,
    control_message_max_age: Duration,
    require_auth: bool,
}

impl BroadcastHub {
    pub fn new(config: &HubConfig, mirror: Option<Arc<dyn StreamMirror>>) -> Self {
        if mirror.is_some() {
            info!(namespace = %config.mirror.namespace, "durable mirror enabled");
        }
        Self {
            registry: Arc::new(ChannelRegistry::new(&config.broker)),
            connections: Arc::new(ConnectionManager::new(&config.broker)),
            publish_limiter: FixedWindowLimiter::new(Duration::from_secs(60)),
            mirror,
            mirror_namespace: config.mirror.namespace.clone(),
            mirror_timeout: config.mirror.publish_timeout,
            control_message_max_age: config.broker.control_message_max_age,
            require_auth: config.broker.require_auth,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Accept a new connection and push the heartbeat-typed welcome
    /// message carrying the connection id and auth status.
    pub async fn connect(
        &self,
        metadata: HashMap<String, String>,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerMessage>)> {
        let (id, receiver) = self.connections.register(metadata).await?;
        let authenticated = !self.require_auth;
        if authenticated {
            self.connections.authenticate(id).await?;
        }
        self.connections
            .try_deliver(id, ServerMessage::welcome(id.to_string(), authenticated))
            .await;
        info!(connection = %id, "connection accepted");
        Ok((id, receiver))
    }

    /// Mark the connection's auth handshake complete
    pub async fn authenticate(&self, conn: ConnectionId) -> Result<()> {
        self.connections.authenticate(conn).await
    }

    /// Subscribe a connection to a channel; returns the subscriber count
    pub async fn subscribe(&self, conn: ConnectionId, channel: &str) -> Result<usize> {
        if !self.registry.exists(channel).await {
            return Err(Error::ChannelNotFound(channel.to_string()));
        }
        if self.require_auth && !self.connections.is_authenticated(conn).await? {
            return Err(Error::Unauthenticated);
        }

        let count = self.registry.add_subscriber(channel, conn).await?;
        self.connections.add_subscription(conn, channel).await?;
        debug!(connection = %conn, channel = %channel, subscribers = count, "subscribed");
        Ok(count)
    }

    /// Unsubscribe; removing a non-member is a no-op
    pub async fn unsubscribe(&self, conn: ConnectionId, channel: &str) -> Result<usize> {
        let count = self.registry.remove_subscriber(channel, conn).await?;
        self.connections.remove_subscription(conn, channel).await?;
        debug!(connection = %conn, channel = %channel, subscribers = count, "unsubscribed");
        Ok(count)
    }

    /// Remove a connection from every channel and drop its state
    pub async fn disconnect(&self, conn: ConnectionId) {
        self.registry.remove_subscriber_everywhere(conn).await;
        self.connections.remove(conn).await;
        info!(connection = %conn, "connection closed");
    }

    /// Publish a payload to a channel. Applies the channel's per-minute
    /// rate limit (drop-newest), appends to replay, fans out to every
    /// subscriber best-effort, and mirrors fire-and-forget.
    pub async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
        priority: MessagePriority,
    ) -> Result<PublishOutcome> {
        let limit = self.registry.rate_limit_of(channel).await?;

        if !self.publish_limiter.check(channel, limit).is_allowed() {
            self.registry.record_drop(channel).await;
            debug!(channel = %channel, "publish dropped by channel rate limit");
            return Ok(PublishOutcome::RateLimited);
        }

        let message = StoredMessage::new(channel, payload, priority);
        self.registry.record_publish(&message).await?;
        self.mirror_message(&message);

        let delivered = self.fan_out(&message).await;
        Ok(PublishOutcome::Delivered { subscribers: delivered })
    }

    /// Deliver a stored message to every current subscriber. Egress
    /// failures are logged and skipped; dead transports are reaped.
    async fn fan_out(&self, message: &StoredMessage) -> usize {
        let subscribers = match self.registry.subscribers(&message.channel).await {
            Ok(subscribers) => subscribers,
            Err(_) => return 0,
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for conn in subscribers {
            let outbound = ServerMessage::Event {
                channel: message.channel.clone(),
                id: message.id.clone(),
                priority: message.priority,
                data: message.payload.clone(),
                timestamp: message.timestamp,
            };
            match self.connections.try_deliver(conn, outbound).await {
                DeliveryResult::Delivered => delivered += 1,
                DeliveryResult::QueueFull => {
                    warn!(connection = %conn, channel = %message.channel, "subscriber lagging, message skipped");
                }
                DeliveryResult::Closed | DeliveryResult::Unknown => dead.push(conn),
            }
        }

        for conn in dead {
            self.disconnect(conn).await;
        }
        delivered
    }

    /// Forward to the durable mirror without blocking the caller
    fn mirror_message(&self, message: &StoredMessage) {
        let Some(mirror) = self.mirror.clone() else {
            return;
        };
        let stream_key = format!("{}:{}", self.mirror_namespace, message.channel);
        let record = MirrorRecord::from_stored(message);
        let timeout = self.mirror_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, mirror.append(&stream_key, record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(stream = %stream_key, "mirror append failed: {}", e),
                Err(_) => warn!(stream = %stream_key, "mirror append timed out"),
            }
        });
    }

    /// Replay buffered channel history to one connection
    pub async fn replay_to(
        &self,
        conn: ConnectionId,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        let history = self.registry.replay_since(channel, since).await?;
        let mut delivered = 0;
        for message in history {
            let outbound = ServerMessage::Event {
                channel: message.channel.clone(),
                id: message.id.clone(),
                priority: message.priority,
                data: message.payload.clone(),
                timestamp: message.timestamp,
            };
            if self.connections.try_deliver(conn, outbound).await == DeliveryResult::Delivered {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Handle one raw control frame from a subscriber. The reply is
    /// enqueued on the connection's outbound queue and also returned.
    pub async fn handle_control(&self, conn: ConnectionId, raw: &str) -> ServerMessage {
        let reply = self.control_reply(conn, raw).await;
        self.connections.try_deliver(conn, reply.clone()).await;
        reply
    }

    async fn control_reply(&self, conn: ConnectionId, raw: &str) -> ServerMessage {
        let message = match parse_client_message(raw) {
            Ok(message) => message,
            Err(_) => return ServerMessage::error("Invalid JSON message"),
        };

        if !self.connections.check_control_rate(conn).is_allowed() {
            return ServerMessage::error("Rate limit exceeded");
        }

        if let Some(sent_at) = message.timestamp {
            let age = Utc::now().signed_duration_since(sent_at);
            if age.to_std().unwrap_or_default() > self.control_message_max_age {
                return ServerMessage::error("Message expired");
            }
        }

        self.connections.touch(conn).await;

        match message.msg_type.as_str() {
            "subscribe" => {
                let Some(channel) = message.channel.as_deref() else {
                    return ServerMessage::error("subscribe requires a channel");
                };
                match self.subscribe(conn, channel).await {
                    Ok(subscribers) => ServerMessage::Subscribe {
                        channel: channel.to_string(),
                        subscribers,
                    },
                    Err(e) => ServerMessage::error(e.to_string()),
                }
            }
            "unsubscribe" => {
                let Some(channel) = message.channel.as_deref() else {
                    return ServerMessage::error("unsubscribe requires a channel");
                };
                match self.unsubscribe(conn, channel).await {
                    Ok(subscribers) => ServerMessage::Unsubscribe {
                        channel: channel.to_string(),
                        subscribers,
                    },
                    Err(e) => ServerMessage::error(e.to_string()),
                }
            }
            "heartbeat" => ServerMessage::heartbeat(),
            other => ServerMessage::error(format!("Unknown message type: {}", other)),
        }
    }

    /// Push a server heartbeat to every open connection
    pub async fn heartbeat_all(&self) -> usize {
        self.connections.broadcast_heartbeat().await
    }

    /// Periodic maintenance: expired rate windows and replay retention
    pub async fn maintenance_sweep(&self) {
        let swept = self.publish_limiter.sweep() + self.connections.sweep_rate_windows();
        if swept > 0 {
            debug!(swept, "rate windows swept");
        }
        self.registry.prune_replay().await;
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.count().await,
            control_violations: self.connections.control_violations(),
            publish_violations: self.publish_limiter.violation_count(),
            channels: self.registry.stats().await,
        }
    }

    pub async fn connection_stats(&self) -> Vec<ConnectionStats> {
        self.connections.stats().await
    }
}
