//! Reference in-memory implementation of the message bus port.
//!
//! Gives the coordination stack a bus it can run against without an external
//! broker: bounded topics with oldest-first trimming, consumer groups with
//! exclusive delivery and explicit acknowledgment, and broadcast fan-out.
//! Durability and replay are out of scope; nothing survives the process.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::domain::errors::DomainResult;
use crate::domain::ports::{BusMessage, MessageBus, MessageId};

/// Configuration for [`InMemoryBus`].
#[derive(Debug, Clone)]
pub struct InMemoryBusConfig {
    /// Bound on entries retained per topic.
    pub topic_max_len: usize,
    /// Capacity of each topic's broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for InMemoryBusConfig {
    fn default() -> Self {
        Self {
            topic_max_len: 1000,
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct GroupState {
    /// Next message id this group will consider for delivery.
    cursor: u64,
    /// Delivered-but-unacknowledged ids, with the consumer that holds them.
    pending: HashMap<u64, String>,
}

struct TopicState {
    entries: VecDeque<BusMessage>,
    next_id: u64,
    groups: HashMap<String, GroupState>,
    broadcast: broadcast::Sender<BusMessage>,
}

impl TopicState {
    fn new(broadcast_capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(broadcast_capacity);
        Self {
            entries: VecDeque::new(),
            next_id: 0,
            groups: HashMap::new(),
            broadcast,
        }
    }
}

/// In-process message bus.
pub struct InMemoryBus {
    topics: RwLock<HashMap<String, TopicState>>,
    config: InMemoryBusConfig,
}

impl InMemoryBus {
    pub fn new(config: InMemoryBusConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Number of entries currently retained on a topic.
    pub async fn topic_len(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, |t| t.entries.len())
    }

    /// Delivered-but-unacknowledged count for a group.
    pub async fn pending_count(&self, topic: &str, group: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(InMemoryBusConfig::default())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> DomainResult<MessageId> {
        let mut topics = self.topics.write().await;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.config.broadcast_capacity));

        let id = MessageId(state.next_id);
        state.next_id += 1;

        let message = BusMessage {
            id,
            topic: topic.to_string(),
            payload,
        };

        state.entries.push_back(message.clone());
        while state.entries.len() > self.config.topic_max_len {
            state.entries.pop_front();
        }

        // No subscribers is fine
        let _ = state.broadcast.send(message);

        Ok(id)
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> DomainResult<Option<BusMessage>> {
        let mut topics = self.topics.write().await;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.config.broadcast_capacity));

        let group_state = state.groups.entry(group.to_string()).or_default();

        // Entries below the cursor were already delivered; trimmed entries
        // are simply gone.
        let next = state
            .entries
            .iter()
            .find(|m| m.id.0 >= group_state.cursor)
            .cloned();

        if let Some(ref message) = next {
            group_state.cursor = message.id.0 + 1;
            group_state
                .pending
                .insert(message.id.0, consumer.to_string());
        }

        Ok(next)
    }

    async fn ack(&self, topic: &str, group: &str, id: MessageId) -> DomainResult<()> {
        let mut topics = self.topics.write().await;
        if let Some(state) = topics.get_mut(topic) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(&id.0);
            }
        }
        // Acknowledging an unknown id is a no-op, like XACK of a stale entry
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> DomainResult<broadcast::Receiver<BusMessage>> {
        let mut topics = self.topics.write().await;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.config.broadcast_capacity));
        Ok(state.broadcast.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_assigns_monotonic_ids() {
        let bus = InMemoryBus::default();
        let first = bus.publish("planning", json!({"n": 1})).await.unwrap();
        let second = bus.publish("planning", json!({"n": 2})).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_group_exclusive_delivery() {
        let bus = InMemoryBus::default();
        bus.publish("planning", json!({"n": 1})).await.unwrap();
        bus.publish("planning", json!({"n": 2})).await.unwrap();

        let a = bus
            .read_group("planning", "workers", "a")
            .await
            .unwrap()
            .unwrap();
        let b = bus
            .read_group("planning", "workers", "b")
            .await
            .unwrap()
            .unwrap();

        // Competing consumers in one group never see the same message
        assert_ne!(a.id, b.id);
        assert!(bus
            .read_group("planning", "workers", "a")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_independent_groups_each_see_everything() {
        let bus = InMemoryBus::default();
        bus.publish("planning", json!({"n": 1})).await.unwrap();

        let first = bus.read_group("planning", "g1", "a").await.unwrap();
        let second = bus.read_group("planning", "g2", "a").await.unwrap();

        assert!(first.is_some());
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn test_ack_clears_pending() {
        let bus = InMemoryBus::default();
        bus.publish("vision", json!({})).await.unwrap();

        let msg = bus
            .read_group("vision", "workers", "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bus.pending_count("vision", "workers").await, 1);

        bus.ack("vision", "workers", msg.id).await.unwrap();
        assert_eq!(bus.pending_count("vision", "workers").await, 0);

        // Idempotent
        bus.ack("vision", "workers", msg.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_topic_trimming() {
        let bus = InMemoryBus::new(InMemoryBusConfig {
            topic_max_len: 3,
            broadcast_capacity: 16,
        });

        for n in 0..10 {
            bus.publish("planning", json!({ "n": n })).await.unwrap();
        }

        assert_eq!(bus.topic_len("planning").await, 3);

        // Oldest entries are gone; the group starts at the surviving tail
        let msg = bus
            .read_group("planning", "workers", "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload["n"], 7);
    }

    #[tokio::test]
    async fn test_broadcast_sees_all_messages() {
        let bus = InMemoryBus::default();
        let mut rx = bus.subscribe("results").await.unwrap();

        bus.publish("results", json!({"n": 1})).await.unwrap();
        bus.publish("results", json!({"n": 2})).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().payload["n"], 1);
        assert_eq!(rx.recv().await.unwrap().payload["n"], 2);
    }
}
