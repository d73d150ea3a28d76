//! Message bus port.
//!
//! The bus engine itself (durability, delivery) is an external collaborator.
//! The core requires only: append with bounded trimming, consumer-group read
//! with per-consumer exclusive delivery and explicit acknowledgment, and a
//! plain broadcast read visible to every reader.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::domain::errors::DomainResult;

/// Monotonic per-topic message id assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry on a topic.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub id: MessageId,
    pub topic: String,
    pub payload: Value,
}

/// Named-topic message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Append a message to `topic`, trimming the oldest entries past the
    /// topic bound. Creates the topic on first use.
    async fn publish(&self, topic: &str, payload: Value) -> DomainResult<MessageId>;

    /// Deliver the next unconsumed message for `consumer` within `group`.
    ///
    /// Each message is delivered to exactly one consumer in the group;
    /// returns `None` when the group has nothing new. Creates the group
    /// reading from the topic's start on first use.
    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> DomainResult<Option<BusMessage>>;

    /// Acknowledge a group-delivered message.
    async fn ack(&self, topic: &str, group: &str, id: MessageId) -> DomainResult<()>;

    /// Broadcast subscription: every subscriber observes every message
    /// published to `topic` after the subscription is created. Filtering is
    /// the reader's responsibility.
    async fn subscribe(&self, topic: &str) -> DomainResult<broadcast::Receiver<BusMessage>>;
}
