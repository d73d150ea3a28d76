//! Subagent manager: single and fanned-out worker calls plus background
//! condition monitors.
//!
//! Built entirely on the bus client and the result aggregator. Fan-out
//! failures are isolated per variant and never propagate; when every
//! variant fails the caller receives an explicit synthetic failure rather
//! than nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{BackgroundMonitor, ManagerConfig, SubagentResult, WorkerFamily};
use crate::infrastructure::bus::BusClient;
use crate::services::aggregator::{AggregationStrategy, ResultAggregator};

/// Invoked exactly once per monitor: with `true` and the worker's details
/// when the condition fires, or with `false` and a timeout reason.
pub type MonitorCallback = Arc<dyn Fn(bool, Value) + Send + Sync>;

struct MonitorHandle {
    info: BackgroundMonitor,
    handle: JoinHandle<()>,
}

/// Dispatches worker calls per family and manages background monitors.
pub struct SubagentManager {
    client: Arc<BusClient>,
    aggregator: ResultAggregator,
    strategy: AggregationStrategy,
    config: ManagerConfig,
    monitors: Arc<RwLock<HashMap<Uuid, MonitorHandle>>>,
}

impl SubagentManager {
    pub fn new(client: Arc<BusClient>, aggregator: ResultAggregator, config: ManagerConfig) -> Self {
        let strategy = AggregationStrategy::from_str(&config.strategy).unwrap_or_else(|| {
            warn!(
                strategy = %config.strategy,
                "Unknown aggregation strategy, using best_confidence"
            );
            AggregationStrategy::BestConfidence
        });

        Self {
            client,
            aggregator,
            strategy,
            config,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// One correlated call against a worker family.
    pub async fn call_single(
        &self,
        family: WorkerFamily,
        params: Value,
        timeout: Option<Duration>,
    ) -> SubagentResult {
        self.client.call(family, params, timeout).await
    }

    /// Fan out one call per variant concurrently, gather all answers, and
    /// aggregate them under the configured strategy.
    ///
    /// Per-variant failures (including timeouts) arrive as failed results,
    /// never as errors. When every variant fails, the return value is a
    /// synthetic failure naming the family and the variant errors.
    pub async fn spawn_parallel(
        &self,
        family: WorkerFamily,
        variants: Vec<Value>,
        timeout: Option<Duration>,
    ) -> SubagentResult {
        if variants.is_empty() {
            return SubagentResult::failure(
                format!("no {family} variants to dispatch"),
                Duration::ZERO,
            );
        }

        let calls = variants
            .into_iter()
            .map(|params| self.client.call(family, params, timeout));
        let results: Vec<SubagentResult> = join_all(calls).await;

        if results.iter().all(|r| !r.success) {
            let errors: Vec<&str> = results
                .iter()
                .filter_map(|r| r.error.as_deref())
                .collect();
            let execution_time = results
                .iter()
                .map(|r| r.execution_time)
                .max()
                .unwrap_or_default();
            return SubagentResult::failure(
                format!(
                    "all {} parallel {family} calls failed: {}",
                    results.len(),
                    errors.join("; ")
                ),
                execution_time,
            );
        }

        self.aggregator
            .aggregate(&results, self.strategy)
            .unwrap_or_else(|| {
                // Unreachable with non-empty input; keep the contract anyway
                SubagentResult::failure(
                    format!("aggregation over {family} produced nothing"),
                    Duration::ZERO,
                )
            })
    }

    /// Launch an independently scheduled condition poll loop.
    ///
    /// Each tick issues one `background` family call asking whether the
    /// condition holds. The callback fires exactly once: `(true, details)`
    /// when the worker reports the condition met, or
    /// `(false, {"reason": "timeout"})` when the monitor's own timeout
    /// elapses first. Monitors are stopped individually and immediately,
    /// not at phase boundaries.
    pub async fn start_background_monitor(
        &self,
        condition_type: &str,
        target: &str,
        callback: MonitorCallback,
        check_interval: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Uuid {
        let check_interval = check_interval.unwrap_or_else(|| self.config.monitor_check_interval());
        let timeout = timeout.unwrap_or_else(|| self.config.monitor_timeout());

        let info = BackgroundMonitor::new(condition_type, target, check_interval, timeout);
        let monitor_id = info.monitor_id;

        let client = Arc::clone(&self.client);
        let monitors = Arc::clone(&self.monitors);
        let condition_type = condition_type.to_string();
        let target = target.to_string();

        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                tokio::time::sleep(check_interval).await;

                if started.elapsed() >= timeout {
                    debug!(%monitor_id, "Background monitor timed out");
                    callback(false, json!({"reason": "timeout"}));
                    break;
                }

                let result = client
                    .call(
                        WorkerFamily::Background,
                        json!({
                            "monitor_id": monitor_id,
                            "condition_type": condition_type,
                            "target": target,
                        }),
                        Some(check_interval),
                    )
                    .await;

                if result.success
                    && result
                        .result
                        .get("condition_met")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                {
                    let details = result
                        .result
                        .get("details")
                        .cloned()
                        .unwrap_or(Value::Null);
                    debug!(%monitor_id, "Background monitor condition met");
                    callback(true, details);
                    break;
                }
            }

            monitors.write().await.remove(&monitor_id);
        });

        info!(%monitor_id, condition = %info.condition_type, "Started background monitor");
        self.monitors
            .write()
            .await
            .insert(monitor_id, MonitorHandle { info, handle });

        monitor_id
    }

    /// Cancel a monitor loop. Idempotent: stopping an unknown or already
    /// finished monitor returns `false`.
    pub async fn stop_background_monitor(&self, monitor_id: Uuid) -> bool {
        match self.monitors.write().await.remove(&monitor_id) {
            Some(monitor) => {
                monitor.handle.abort();
                info!(%monitor_id, "Stopped background monitor");
                true
            }
            None => {
                debug!(%monitor_id, "Stop requested for unknown monitor");
                false
            }
        }
    }

    /// Snapshot of currently running monitors.
    pub async fn active_monitors(&self) -> Vec<BackgroundMonitor> {
        self.monitors
            .read()
            .await
            .values()
            .map(|m| m.info.clone())
            .collect()
    }
}
