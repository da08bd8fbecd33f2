//! Durable stream mirror bridge
//!
//! Every accepted publish may be forwarded to an external append-only
//! stream keyed `<namespace>:<channel>`. The bridge is fire-and-forget:
//! append failures are logged by the caller and never block fan-out.
//! The transport behind the trait is a collaborator; an optional NATS
//! implementation ships behind the `nats-mirror` feature.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::broker::StoredMessage;
use crate::error::Result;
use crate::events::MessagePriority;

/// Record shape appended to the external stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
    pub priority: MessagePriority,
    /// JSON-encoded message payload
    pub data: String,
}

impl MirrorRecord {
    pub fn from_stored(message: &StoredMessage) -> Self {
        Self {
            id: message.id.clone(),
            record_type: "event".to_string(),
            timestamp: message.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            priority: message.priority,
            data: message.payload.to_string(),
        }
    }
}

/// External append-only stream collaborator
#[async_trait]
pub trait StreamMirror: Send + Sync {
    /// Append one record under the given stream key
    async fn append(&self, stream_key: &str, record: MirrorRecord) -> Result<()>;
}

/// In-process mirror that retains records; used in tests and as a stand-in
/// when no external stream is wired up.
#[derive(Default)]
pub struct MemoryMirror {
    records: std::sync::Mutex<Vec<(String, MirrorRecord)>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, MirrorRecord)> {
        self.records.lock().expect("mirror lock poisoned").clone()
    }
}

#[async_trait]
impl StreamMirror for MemoryMirror {
    async fn append(&self, stream_key: &str, record: MirrorRecord) -> Result<()> {
        self.records
            .lock()
            .expect("mirror lock poisoned")
            .push((stream_key.to_string(), record));
        Ok(())
    }
}

#[cfg(feature = "nats-mirror")]
pub mod nats {
    //! NATS-backed mirror transport

    use super::*;
    use crate::error::Error;

    pub struct NatsMirror {
        client: async_nats::Client,
    }

    impl NatsMirror {
        pub async fn connect(url: &str) -> Result<Self> {
            let client = async_nats::connect(url)
                .await
                .map_err(|e| Error::Mirror(format!("nats connect failed: {}", e)))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl StreamMirror for NatsMirror {
        async fn append(&self, stream_key: &str, record: MirrorRecord) -> Result<()> {
            let payload = serde_json::to_vec(&record)?;
            self.client
                .publish(stream_key.to_string(), payload.into())
                .await
                .map_err(|e| Error::Mirror(format!("nats publish failed: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_shape() {
        let stored = StoredMessage::new("logs.all", json!({"message": "hi"}), MessagePriority::High);
        let record = MirrorRecord::from_stored(&stored);

        assert_eq!(record.id, stored.id);
        assert_eq!(record.record_type, "event");
        assert!(record.timestamp.ends_with('Z'));
        assert_eq!(record.data, r#"{"message":"hi"}"#);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("type").is_some());
    }

    #[tokio::test]
    async fn test_memory_mirror_appends() {
        let mirror = MemoryMirror::new();
        let stored = StoredMessage::new("metrics", json!({"v": 1}), MessagePriority::Low);
        mirror
            .append("pulsehub:metrics", MirrorRecord::from_stored(&stored))
            .await
            .unwrap();

        let records = mirror.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "pulsehub:metrics");
    }
}
