//! Best-effort event publication for terminal state transitions.
//!
//! A failed publish is logged and never rolls back the state change that
//! triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

pub const TOPIC_TRANSACTIONS: &str = "custody.transactions";
pub const TOPIC_SIGNATURES: &str = "custody.signatures";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("No subscribers for topic {0}")]
    NoSubscribers(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish failed: {0}")]
    Transport(String),
}

/// One published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub key: String,
    pub value: serde_json::Value,
}

/// JSON envelope carried in `Event::value`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub id: String,
    pub vault_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, value: serde_json::Value)
    -> Result<(), EventError>;
}

/// Publish and swallow failures
pub async fn publish_best_effort<P: EventPublisher + ?Sized>(
    publisher: &P,
    topic: &str,
    key: &str,
    envelope: &StatusEnvelope,
) {
    let value = match serde_json::to_value(envelope) {
        Ok(v) => v,
        Err(e) => {
            warn!(topic, key, error = %e, "Failed to encode event");
            return;
        }
    };
    if let Err(e) = publisher.publish(topic, key, value).await {
        warn!(topic, key, error = %e, "Event publish failed");
    }
}

/// Drops every event
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(
        &self,
        _topic: &str,
        _key: &str,
        _value: serde_json::Value,
    ) -> Result<(), EventError> {
        Ok(())
    }
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Event>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), EventError> {
        let event = Event {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
        };
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| EventError::NoSubscribers(topic.to_string()))
    }
}
