//! Bus client and the correlated request/response protocol.
//!
//! Each worker family owns a topic. A call publishes a request carrying a
//! fresh correlation id to the family topic and parks a oneshot keyed by
//! that id. Workers consume family topics through a consumer group (each
//! request reaches exactly one worker in the pool) and publish answers to a
//! single shared results topic. Every client reads the results topic in
//! broadcast mode and resolves only its own pending correlation ids,
//! ignoring the rest. The alternative design, per-caller response topics
//! keyed by client id, trades topic-count growth for the elimination of the
//! O(clients x results) filtering; both are sound at this system's scale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BusConfig, SubagentResult, WorkerFamily, WorkerRequest, WorkerResponse};
use crate::domain::ports::{BusMessage, MessageBus, MessageId};

type PendingMap = Arc<RwLock<HashMap<Uuid, oneshot::Sender<WorkerResponse>>>>;

/// Async client for the correlated-call protocol.
pub struct BusClient {
    bus: Arc<dyn MessageBus>,
    config: BusConfig,
    pending: PendingMap,
    listener: JoinHandle<()>,
}

impl BusClient {
    /// Connect to the bus and start the results listener.
    ///
    /// The listener subscribes before this returns: a `call` issued
    /// afterwards cannot race its own response. (Responses to ids that were
    /// never registered, or arriving after their caller timed out, are
    /// dropped by the filter.)
    pub async fn connect(bus: Arc<dyn MessageBus>, config: BusConfig) -> DomainResult<Self> {
        let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        let rx = bus.subscribe(&config.results_topic).await?;
        let listener = Self::spawn_results_listener(rx, Arc::clone(&pending));

        Ok(Self {
            bus,
            config,
            pending,
            listener,
        })
    }

    fn spawn_results_listener(
        mut rx: tokio::sync::broadcast::Receiver<BusMessage>,
        pending: PendingMap,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        let response: WorkerResponse = match serde_json::from_value(msg.payload) {
                            Ok(r) => r,
                            Err(e) => {
                                warn!("Malformed worker response on results topic: {e}");
                                continue;
                            }
                        };

                        let sender = pending.write().await.remove(&response.task_id);
                        match sender {
                            Some(tx) => {
                                // Receiver dropped means the caller timed out
                                let _ = tx.send(response);
                            }
                            None => {
                                trace!(task_id = %response.task_id, "Ignoring foreign result");
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Results listener lagged, {skipped} responses dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Results topic closed, stopping listener");
                        break;
                    }
                }
            }
        })
    }

    /// The client name stamped into requests.
    pub fn requester(&self) -> &str {
        &self.config.client_name
    }

    /// Raw publish passthrough.
    pub async fn publish(&self, topic: &str, payload: Value) -> DomainResult<MessageId> {
        self.bus.publish(topic, payload).await
    }

    /// Publish a worker response to the shared results topic.
    pub async fn respond(&self, response: WorkerResponse) -> DomainResult<MessageId> {
        let payload = serde_json::to_value(&response)?;
        self.bus.publish(&self.config.results_topic, payload).await
    }

    /// Issue one correlated call against a worker family.
    ///
    /// Never returns an error: publish failures and expiry both surface as a
    /// failed [`SubagentResult`] (a timeout mentions "timeout" in its
    /// error). Retrying is a caller policy; the client performs none.
    pub async fn call(
        &self,
        family: WorkerFamily,
        params: Value,
        timeout: Option<std::time::Duration>,
    ) -> SubagentResult {
        let timeout = timeout.unwrap_or_else(|| self.config.call_timeout());
        let task_id = Uuid::new_v4();
        let started = Instant::now();

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(task_id, tx);

        let request = WorkerRequest {
            task_id,
            params,
            requester: self.config.client_name.clone(),
            timeout_secs: timeout.as_secs(),
        };

        let payload = match serde_json::to_value(&request) {
            Ok(p) => p,
            Err(e) => {
                self.pending.write().await.remove(&task_id);
                return SubagentResult::failure(
                    format!("failed to encode request: {e}"),
                    started.elapsed(),
                );
            }
        };

        if let Err(e) = self.bus.publish(family.topic(), payload).await {
            self.pending.write().await.remove(&task_id);
            return SubagentResult::failure(
                format!("failed to publish to '{}': {e}", family.topic()),
                started.elapsed(),
            );
        }

        trace!(task_id = %task_id, family = %family, "Dispatched worker call");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                let elapsed = started.elapsed();
                if response.success {
                    SubagentResult::success(response.result, elapsed)
                } else {
                    SubagentResult::failure(
                        response
                            .error
                            .unwrap_or_else(|| "worker reported failure".to_string()),
                        elapsed,
                    )
                }
            }
            Ok(Err(_)) => {
                self.pending.write().await.remove(&task_id);
                SubagentResult::failure("response channel closed", started.elapsed())
            }
            Err(_) => {
                self.pending.write().await.remove(&task_id);
                debug!(task_id = %task_id, family = %family, "Worker call timed out");
                SubagentResult::failure(
                    format!("timeout after {}s", timeout.as_secs()),
                    started.elapsed(),
                )
            }
        }
    }

    /// Spawn a consumer-group reader that feeds each message to `handler`.
    ///
    /// Messages are acknowledged immediately after delivery, before the
    /// handler runs: broker redelivery is broker-level retry only, not an
    /// application-level at-least-once guarantee. Handler errors are logged
    /// and isolated. Abort the returned handle to stop the loop.
    pub fn spawn_group_consumer<F, Fut>(
        &self,
        topic: String,
        group: String,
        consumer: String,
        handler: F,
    ) -> JoinHandle<()>
    where
        F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let poll_interval = self.config.group_poll_interval();
        tokio::spawn(async move {
            loop {
                match bus.read_group(&topic, &group, &consumer).await {
                    Ok(Some(msg)) => {
                        if let Err(e) = bus.ack(&topic, &group, msg.id).await {
                            warn!(topic = %topic, "Failed to ack message {}: {e}", msg.id);
                        }
                        if let Err(e) = handler(msg).await {
                            warn!(topic = %topic, "Message handler failed: {e:#}");
                        }
                    }
                    Ok(None) => {
                        tokio::time::sleep(poll_interval).await;
                    }
                    Err(e) => {
                        warn!(topic = %topic, "Group read failed: {e}");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        })
    }

    /// Serve one worker family: decode each request, run `handler`, publish
    /// its response to the results topic.
    ///
    /// This is the worker-side harness; worker processes (and tests) use it
    /// to join a family's consumer-group pool.
    pub fn spawn_worker<F, Fut>(
        &self,
        family: WorkerFamily,
        group: &str,
        consumer: &str,
        handler: F,
    ) -> JoinHandle<()>
    where
        F: Fn(WorkerRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = WorkerResponse> + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let results_topic = self.config.results_topic.clone();
        let handler = Arc::new(handler);
        self.spawn_group_consumer(
            family.topic().to_string(),
            group.to_string(),
            consumer.to_string(),
            move |msg| {
                let bus = Arc::clone(&bus);
                let results_topic = results_topic.clone();
                let handler = Arc::clone(&handler);
                async move {
                    let request: WorkerRequest = serde_json::from_value(msg.payload)
                        .map_err(|e| anyhow::anyhow!("malformed worker request: {e}"))?;
                    let response = handler(request).await;
                    let payload = serde_json::to_value(&response)?;
                    bus.publish(&results_topic, payload).await?;
                    Ok(())
                }
            },
        )
    }

    /// Pending correlated calls awaiting a response.
    pub async fn pending_calls(&self) -> usize {
        self.pending.read().await.len()
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::memory::InMemoryBus;
    use serde_json::json;

    async fn client() -> Arc<BusClient> {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::default());
        Arc::new(BusClient::connect(bus, BusConfig::default()).await.unwrap())
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let client = client().await;

        let worker = client.spawn_worker(WorkerFamily::Planning, "planners", "p1", |req| async move {
            WorkerResponse {
                task_id: req.task_id,
                success: true,
                result: json!({"actions": [{"type": "press_keys"}], "confidence": 0.9}),
                error: None,
            }
        });

        let result = client
            .call(WorkerFamily::Planning, json!({"goal": "open app"}), None)
            .await;

        assert!(result.success);
        assert!((result.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(client.pending_calls().await, 0);
        worker.abort();
    }

    #[tokio::test]
    async fn test_call_timeout_with_no_responder() {
        let client = client().await;
        let started = Instant::now();

        let result = client
            .call(
                WorkerFamily::Vision,
                json!({}),
                Some(std::time::Duration::from_millis(200)),
            )
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timeout"));
        assert!(started.elapsed() < std::time::Duration::from_millis(300));
        // The pending entry is cleaned up on expiry
        assert_eq!(client.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_worker_failure_propagates_as_failed_result() {
        let client = client().await;

        let worker = client.spawn_worker(WorkerFamily::Specialist, "spec", "s1", |req| async move {
            WorkerResponse {
                task_id: req.task_id,
                success: false,
                result: Value::Null,
                error: Some("no answer found".to_string()),
            }
        });

        let result = client
            .call(WorkerFamily::Specialist, json!({"query": "?"}), None)
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no answer found"));
        worker.abort();
    }

    #[tokio::test]
    async fn test_foreign_results_are_ignored() {
        let client = client().await;

        // A response nobody asked for
        client
            .respond(WorkerResponse {
                task_id: Uuid::new_v4(),
                success: true,
                result: json!({}),
                error: None,
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(client.pending_calls().await, 0);
    }
}
