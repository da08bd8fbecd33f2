//! Connection manager
//!
//! Tracks live subscriber connections: their outbound transport handle,
//! channel subscriptions, auth state, activity timestamps, and the
//! control-plane rate window. The transport itself (websocket, TCP frame
//! codec) lives outside the core; a connection here is an id plus a
//! bounded outbound queue the transport drains.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;
use super::rate_limit::{FixedWindowLimiter, RateLimitResult};
use super::ConnectionId;
use crate::config::BrokerConfig;
use crate::error::{Error, Result};

/// Outcome of a non-blocking delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// Outbound queue full; message skipped for this subscriber
    QueueFull,
    /// Transport receiver dropped; connection is dead
    Closed,
    Unknown,
}

struct ConnectionState {
    sender: mpsc::Sender<ServerMessage>,
    subscriptions: HashSet<String>,
    authenticated: bool,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    metadata: HashMap<String, String>,
}

/// Point-in-time view of one connection for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub id: ConnectionId,
    pub subscriptions: Vec<String>,
    pub authenticated: bool,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Registry of live connections
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, ConnectionState>>,
    control_limiter: FixedWindowLimiter,
    control_rate_limit: u32,
    max_connections: usize,
    queue_depth: usize,
}

impl ConnectionManager {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            control_limiter: FixedWindowLimiter::new(Duration::from_secs(60)),
            control_rate_limit: config.control_rate_limit_per_minute,
            max_connections: config.max_connections,
            queue_depth: config.connection_queue_depth,
        }
    }

    /// Register a new connection; the returned receiver is the transport's
    /// outbound queue. Fails when the connection limit is reached, the
    /// only error that terminates a connection.
    pub async fn register(
        &self,
        metadata: HashMap<String, String>,
    ) -> Result<(ConnectionId, mpsc::Receiver<ServerMessage>)> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.max_connections {
            return Err(Error::ConnectionLimit(connections.len()));
        }

        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        let now = Utc::now();
        connections.insert(
            id,
            ConnectionState {
                sender,
                subscriptions: HashSet::new(),
                authenticated: false,
                connected_at: now,
                last_activity: now,
                metadata,
            },
        );
        debug!(connection = %id, total = connections.len(), "connection registered");
        Ok((id, receiver))
    }

    /// Remove a connection and return the channels it was subscribed to,
    /// so the caller can clean up channel-side membership.
    pub async fn remove(&self, conn: ConnectionId) -> Option<Vec<String>> {
        let mut connections = self.connections.write().await;
        let state = connections.remove(&conn)?;
        self.control_limiter.forget(&conn.to_string());
        debug!(connection = %conn, remaining = connections.len(), "connection removed");
        Some(state.subscriptions.into_iter().collect())
    }

    pub async fn contains(&self, conn: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&conn)
    }

    /// Mark the auth handshake complete for this connection
    pub async fn authenticate(&self, conn: ConnectionId) -> Result<()> {
        let mut connections = self.connections.write().await;
        let state = connections
            .get_mut(&conn)
            .ok_or_else(|| Error::ConnectionNotFound(conn.to_string()))?;
        state.authenticated = true;
        Ok(())
    }

    pub async fn is_authenticated(&self, conn: ConnectionId) -> Result<bool> {
        let connections = self.connections.read().await;
        let state = connections
            .get(&conn)
            .ok_or_else(|| Error::ConnectionNotFound(conn.to_string()))?;
        Ok(state.authenticated)
    }

    pub async fn touch(&self, conn: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(state) = connections.get_mut(&conn) {
            state.last_activity = Utc::now();
        }
    }

    pub async fn add_subscription(&self, conn: ConnectionId, channel: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        let state = connections
            .get_mut(&conn)
            .ok_or_else(|| Error::ConnectionNotFound(conn.to_string()))?;
        state.subscriptions.insert(channel.to_string());
        Ok(())
    }

    pub async fn remove_subscription(&self, conn: ConnectionId, channel: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        let state = connections
            .get_mut(&conn)
            .ok_or_else(|| Error::ConnectionNotFound(conn.to_string()))?;
        state.subscriptions.remove(channel);
        Ok(())
    }

    pub async fn subscriptions(&self, conn: ConnectionId) -> Result<Vec<String>> {
        let connections = self.connections.read().await;
        let state = connections
            .get(&conn)
            .ok_or_else(|| Error::ConnectionNotFound(conn.to_string()))?;
        Ok(state.subscriptions.iter().cloned().collect())
    }

    /// Best-effort, non-blocking delivery. A full queue or closed
    /// transport never blocks the caller.
    pub async fn try_deliver(&self, conn: ConnectionId, message: ServerMessage) -> DeliveryResult {
        let connections = self.connections.read().await;
        let Some(state) = connections.get(&conn) else {
            return DeliveryResult::Unknown;
        };
        match state.sender.try_send(message) {
            Ok(()) => DeliveryResult::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %conn, "outbound queue full, skipping delivery");
                DeliveryResult::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %conn, "outbound queue closed");
                DeliveryResult::Closed
            }
        }
    }

    /// Push a heartbeat to every open connection
    pub async fn broadcast_heartbeat(&self) -> usize {
        let connections = self.connections.read().await;
        let mut delivered = 0;
        for (id, state) in connections.iter() {
            if state.sender.try_send(ServerMessage::heartbeat()).is_ok() {
                delivered += 1;
            } else {
                debug!(connection = %id, "heartbeat skipped");
            }
        }
        delivered
    }

    /// Count one control message against the connection's 60s window
    pub fn check_control_rate(&self, conn: ConnectionId) -> RateLimitResult {
        self.control_limiter
            .check(&conn.to_string(), self.control_rate_limit)
    }

    /// Periodic sweep of expired rate windows
    pub fn sweep_rate_windows(&self) -> usize {
        self.control_limiter.sweep()
    }

    /// Total control messages blocked by rate limiting since startup
    pub fn control_violations(&self) -> u64 {
        self.control_limiter.violation_count()
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn stats(&self) -> Vec<ConnectionStats> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .map(|(id, state)| ConnectionStats {
                id: *id,
                subscriptions: state.subscriptions.iter().cloned().collect(),
                authenticated: state.authenticated,
                connected_at: state.connected_at,
                last_activity: state.last_activity,
            })
            .collect()
    }

    pub async fn metadata(&self, conn: ConnectionId) -> Result<HashMap<String, String>> {
        let connections = self.connections.read().await;
        let state = connections
            .get(&conn)
            .ok_or_else(|| Error::ConnectionNotFound(conn.to_string()))?;
        Ok(state.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(max_connections: usize, queue_depth: usize) -> ConnectionManager {
        let config = BrokerConfig {
            max_connections,
            connection_queue_depth: queue_depth,
            ..Default::default()
        };
        ConnectionManager::new(&config)
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let manager = manager_with(10, 8);
        let (id, _rx) = manager.register(HashMap::new()).await.unwrap();
        assert!(manager.contains(id).await);
        assert_eq!(manager.count().await, 1);

        manager.add_subscription(id, "logs.all").await.unwrap();
        let subs = manager.remove(id).await.unwrap();
        assert_eq!(subs, vec!["logs.all".to_string()]);
        assert!(!manager.contains(id).await);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let manager = manager_with(2, 8);
        let (_a, _rx_a) = manager.register(HashMap::new()).await.unwrap();
        let (_b, _rx_b) = manager.register(HashMap::new()).await.unwrap();
        assert!(matches!(
            manager.register(HashMap::new()).await,
            Err(Error::ConnectionLimit(2))
        ));
    }

    #[tokio::test]
    async fn test_delivery_outcomes() {
        let manager = manager_with(10, 1);
        let (id, rx) = manager.register(HashMap::new()).await.unwrap();

        assert_eq!(
            manager.try_deliver(id, ServerMessage::heartbeat()).await,
            DeliveryResult::Delivered
        );
        // Queue depth 1: second delivery is skipped, not blocked on
        assert_eq!(
            manager.try_deliver(id, ServerMessage::heartbeat()).await,
            DeliveryResult::QueueFull
        );

        drop(rx);
        assert_eq!(
            manager.try_deliver(id, ServerMessage::heartbeat()).await,
            DeliveryResult::Closed
        );

        assert_eq!(
            manager
                .try_deliver(Uuid::new_v4(), ServerMessage::heartbeat())
                .await,
            DeliveryResult::Unknown
        );
    }

    #[tokio::test]
    async fn test_authentication_flag() {
        let manager = manager_with(10, 8);
        let (id, _rx) = manager.register(HashMap::new()).await.unwrap();
        assert!(!manager.is_authenticated(id).await.unwrap());
        manager.authenticate(id).await.unwrap();
        assert!(manager.is_authenticated(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_control_rate_limit() {
        let config = BrokerConfig {
            control_rate_limit_per_minute: 2,
            ..Default::default()
        };
        let manager = ConnectionManager::new(&config);
        let (id, _rx) = manager.register(HashMap::new()).await.unwrap();

        assert!(manager.check_control_rate(id).is_allowed());
        assert!(manager.check_control_rate(id).is_allowed());
        assert!(!manager.check_control_rate(id).is_allowed());
    }
}
