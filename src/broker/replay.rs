//! Bounded per-channel message history
//!
//! Late subscribers catch up from here. The buffer is trimmed on every
//! append: to a hard length cap, and to the channel's retention window,
//! whichever bites first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

use crate::events::MessagePriority;

/// A message as retained for replay and mirroring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub channel: String,
    pub priority: MessagePriority,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(channel: impl Into<String>, payload: serde_json::Value, priority: MessagePriority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            priority,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded, retention-pruned history for one channel
pub struct ReplayBuffer {
    messages: VecDeque<StoredMessage>,
    max_messages: usize,
    retention: Duration,
}

impl ReplayBuffer {
    pub fn new(max_messages: usize, retention: Duration) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages,
            retention,
        }
    }

    /// Append one message, trimming to the length cap and retention window
    pub fn append(&mut self, message: StoredMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
        self.prune(Utc::now());
    }

    /// Drop entries older than the retention window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let retention = match chrono::Duration::from_std(self.retention) {
            Ok(d) => d,
            Err(_) => return,
        };
        let cutoff = now - retention;
        while let Some(front) = self.messages.front() {
            if front.timestamp < cutoff {
                self.messages.pop_front();
            } else {
                break;
            }
        }
    }

    /// Messages newer than `since`, oldest first
    pub fn replay_since(&self, since: DateTime<Utc>) -> Vec<StoredMessage> {
        self.messages
            .iter()
            .filter(|m| m.timestamp > since)
            .cloned()
            .collect()
    }

    /// The most recent `count` messages, oldest first
    pub fn recent(&self, count: usize) -> Vec<StoredMessage> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
