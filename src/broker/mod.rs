//! Channel broker: connections, registry, rate limiting, replay, fan-out

pub mod connection;
pub mod hub;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod replay;

use uuid::Uuid;

/// Identifier for one live subscriber connection
pub type ConnectionId = Uuid;

pub use connection::{ConnectionManager, ConnectionStats, DeliveryResult};
pub use hub::{BroadcastHub, HubStats, PublishOutcome};
pub use protocol::{parse_client_message, ClientMessage, ServerMessage};
pub use rate_limit::{FixedWindowLimiter, RateLimitResult};
pub use registry::{route_log_channel, ChannelRegistry, ChannelStats};
pub use replay::{ReplayBuffer, StoredMessage};
