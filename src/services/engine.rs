//! Automation engine: drives one goal through decomposition, scheduling,
//! phase-by-phase execution, and result assembly.
//!
//! Nothing inside phase or subtask execution raises past this boundary.
//! Worker failures, executor failures, and timeouts all become failed
//! per-subtask results; the only caller-visible failure path is an
//! `AutomationResult` with `success == false`. Cancellation is cooperative
//! and takes effect at the next phase boundary; subtasks already running
//! inside a parallel phase are not interrupted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    Approach, AutomationResult, EngineConfig, ExecutionPhase, ExecutionPlan, SubagentResult,
    Subtask, SubtaskContext, TaskState, WorkerFamily,
};
use crate::domain::ports::{ActionExecutor, ReflectionLoop};
use crate::services::decomposer::SubtaskDecomposer;
use crate::services::progress_tracker::ProgressTracker;
use crate::services::scheduler::TaskScheduler;
use crate::services::subagent_manager::SubagentManager;

/// One in-flight goal.
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub task_id: Uuid,
    pub goal: String,
    pub state: TaskState,
    pub subtasks: Vec<Subtask>,
    /// 1-based id of the phase currently executing, 0 before execution.
    pub current_phase: usize,
    cancel_flag: Arc<AtomicBool>,
}

/// Top-level driver owning one state machine per in-flight goal.
pub struct AutomationEngine {
    decomposer: Arc<SubtaskDecomposer>,
    scheduler: TaskScheduler,
    manager: Arc<SubagentManager>,
    tracker: Arc<ProgressTracker>,
    executor: Arc<dyn ActionExecutor>,
    reflector: Arc<dyn ReflectionLoop>,
    config: EngineConfig,
    default_subtask_timeout: Duration,
    tasks: RwLock<HashMap<Uuid, RunningTask>>,
    finished: RwLock<HashMap<Uuid, (TaskState, AutomationResult)>>,
    finished_order: RwLock<VecDeque<Uuid>>,
}

impl AutomationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        decomposer: Arc<SubtaskDecomposer>,
        scheduler: TaskScheduler,
        manager: Arc<SubagentManager>,
        tracker: Arc<ProgressTracker>,
        executor: Arc<dyn ActionExecutor>,
        reflector: Arc<dyn ReflectionLoop>,
        config: EngineConfig,
    ) -> Self {
        let default_subtask_timeout = scheduler.config().default_subtask_timeout();
        Self {
            decomposer,
            scheduler,
            manager,
            tracker,
            executor,
            reflector,
            config,
            default_subtask_timeout,
            tasks: RwLock::new(HashMap::new()),
            finished: RwLock::new(HashMap::new()),
            finished_order: RwLock::new(VecDeque::new()),
        }
    }

    /// Run one goal to a terminal state.
    ///
    /// Decomposes, schedules, executes phase by phase, and assembles the
    /// final result. After a phase with partial failure the remaining work
    /// is re-planned from the checkpoint, at most `max_replans` times.
    pub async fn execute_complex_task(&self, goal: &str, context: Value) -> AutomationResult {
        let task_id = Uuid::new_v4();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let started = Instant::now();

        self.tasks.write().await.insert(
            task_id,
            RunningTask {
                task_id,
                goal: goal.to_string(),
                state: TaskState::Pending,
                subtasks: Vec::new(),
                current_phase: 0,
                cancel_flag: Arc::clone(&cancel_flag),
            },
        );

        info!(%task_id, goal, "Starting automation task");

        self.set_state(task_id, TaskState::Decomposing).await;
        let subtasks = self.decomposer.decompose(goal, &context).await;
        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.subtasks = subtasks.clone();
            }
        }

        self.set_state(task_id, TaskState::Scheduling).await;
        let plan = self.scheduler.create_plan(&subtasks);
        debug!(%task_id, phases = plan.phase_count(), "Plan ready");

        self.tracker.start_task(task_id, &subtasks).await;

        self.set_state(task_id, TaskState::Executing).await;
        let run = self
            .execute_plan(task_id, &context, plan, &cancel_flag)
            .await;

        // Anything never attempted is skipped, whatever ended the run
        for subtask in &subtasks {
            if !run.attempted.contains(&subtask.id) {
                self.tracker.skip_subtask(task_id, subtask.id).await;
            }
        }

        let final_state = if run.cancelled {
            TaskState::Cancelled
        } else if run.aborted {
            TaskState::Failed
        } else {
            TaskState::Completed
        };
        self.set_state(task_id, final_state).await;

        let result = build_result(
            task_id,
            final_state,
            &subtasks,
            run.results,
            run.abort_reason,
            started.elapsed(),
        );

        self.tracker.end_task(task_id).await;
        self.retire(task_id, final_state, result.clone()).await;

        info!(%task_id, state = %final_state, summary = %result.summary, "Automation task finished");
        result
    }

    /// Set the cooperative cancel flag. Takes effect at the next phase
    /// boundary; returns false for unknown or already finished tasks.
    pub async fn cancel_task(&self, task_id: Uuid) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(&task_id) {
            Some(task) if !task.state.is_terminal() => {
                task.cancel_flag.store(true, Ordering::SeqCst);
                info!(%task_id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// State of a live or finished task.
    pub async fn state_of(&self, task_id: Uuid) -> Option<TaskState> {
        if let Some(task) = self.tasks.read().await.get(&task_id) {
            return Some(task.state);
        }
        self.finished
            .read()
            .await
            .get(&task_id)
            .map(|(state, _)| *state)
    }

    /// Result of a finished task.
    pub async fn result_of(&self, task_id: Uuid) -> Option<AutomationResult> {
        self.finished
            .read()
            .await
            .get(&task_id)
            .map(|(_, result)| result.clone())
    }

    /// Snapshot of in-flight tasks.
    pub async fn active_tasks(&self) -> Vec<RunningTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    async fn set_state(&self, task_id: Uuid, state: TaskState) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            debug!(%task_id, from = %task.state, to = %state, "Task state transition");
            task.state = state;
        }
    }

    async fn set_current_phase(&self, task_id: Uuid, phase_id: usize) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            task.current_phase = phase_id;
        }
    }

    /// Move a finished task out of the live map into the bounded result map.
    async fn retire(&self, task_id: Uuid, state: TaskState, result: AutomationResult) {
        self.tasks.write().await.remove(&task_id);

        let mut finished = self.finished.write().await;
        let mut order = self.finished_order.write().await;
        finished.insert(task_id, (state, result));
        order.push_back(task_id);
        while order.len() > self.config.history_limit {
            if let Some(evicted) = order.pop_front() {
                finished.remove(&evicted);
            }
        }
    }

    async fn execute_plan(
        &self,
        task_id: Uuid,
        context: &Value,
        mut plan: ExecutionPlan,
        cancel_flag: &AtomicBool,
    ) -> PlanRun {
        let mut run = PlanRun::default();
        let mut replans = 0u32;

        'plan: loop {
            let mut phase_idx = 0;
            let mut replanned = false;

            while phase_idx < plan.phases.len() {
                if cancel_flag.load(Ordering::SeqCst) {
                    info!(%task_id, "Cancelled at phase boundary");
                    run.cancelled = true;
                    break 'plan;
                }

                let phase = plan.phases[phase_idx].clone();
                self.set_current_phase(task_id, phase.phase_id).await;
                debug!(
                    %task_id,
                    phase = phase.phase_id,
                    parallel = phase.can_parallel,
                    subtasks = phase.subtask_count(),
                    "Executing phase"
                );

                let phase_results = self.execute_phase(task_id, context, &phase, &run.attempted).await;

                let mut any_success = false;
                let mut any_failure = false;
                for (subtask_id, result) in phase_results {
                    if result.success {
                        any_success = true;
                        run.completed.insert(subtask_id);
                    } else {
                        any_failure = true;
                        run.failed.insert(subtask_id);
                        run.completed.remove(&subtask_id);
                    }
                    run.attempted.insert(subtask_id);
                    run.results.insert(subtask_id, result);
                }

                if !any_success {
                    warn!(%task_id, phase = phase.phase_id, "Phase produced no success, stopping plan");
                    run.aborted = true;
                    run.abort_reason = Some(format!(
                        "phase {} had no successful subtask",
                        phase.phase_id
                    ));
                    break 'plan;
                }

                if any_failure && replans < self.config.max_replans {
                    replans += 1;
                    info!(%task_id, replans, "Partial failure, re-planning remaining work");
                    let failed_snapshot = run.failed.clone();
                    plan = self
                        .scheduler
                        .replan(&plan, &run.completed, &failed_snapshot);
                    replanned = true;
                    break;
                }

                phase_idx += 1;
            }

            if !replanned {
                break;
            }
            if plan.is_empty() {
                break;
            }
        }

        run
    }

    /// Execute one phase, parallel or strictly ordered.
    ///
    /// Sequential phases stop early at the first failure; the unexecuted
    /// tail is left unattempted (a later re-plan may pick it up). Parallel
    /// phases always wait for every member.
    async fn execute_phase(
        &self,
        task_id: Uuid,
        context: &Value,
        phase: &ExecutionPhase,
        attempted: &HashSet<Uuid>,
    ) -> Vec<(Uuid, SubagentResult)> {
        if phase.can_parallel {
            let runs = phase.subtasks.iter().map(|subtask| async move {
                let result = self
                    .run_subtask(task_id, context, subtask, attempted.contains(&subtask.id))
                    .await;
                (subtask.id, result)
            });
            join_all(runs).await
        } else {
            let mut results = Vec::new();
            for subtask in &phase.subtasks {
                let result = self
                    .run_subtask(task_id, context, subtask, attempted.contains(&subtask.id))
                    .await;
                let failed = !result.success;
                results.push((subtask.id, result));
                if failed {
                    debug!(%task_id, subtask_id = %subtask.id, "Sequential phase stopped at first failure");
                    break;
                }
            }
            results
        }
    }

    /// Run one subtask under its timeout, reporting to the tracker.
    ///
    /// A re-attempt after re-planning does not touch the tracker: the first
    /// attempt's record is final there, while the engine's own result map
    /// reflects the retry.
    async fn run_subtask(
        &self,
        task_id: Uuid,
        context: &Value,
        subtask: &Subtask,
        retry: bool,
    ) -> SubagentResult {
        if !retry {
            self.tracker.start_subtask(task_id, subtask.id).await;
        }

        let timeout = subtask.timeout.unwrap_or(self.default_subtask_timeout);
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.dispatch(context, subtask, timeout)).await
        {
            Ok(result) => result,
            Err(_) => SubagentResult::failure(
                format!(
                    "subtask '{}' timeout after {}s",
                    subtask.description,
                    timeout.as_secs()
                ),
                started.elapsed(),
            ),
        };

        if !retry {
            self.tracker
                .complete_subtask(
                    task_id,
                    subtask.id,
                    result.success,
                    Some(result.result.clone()),
                    result.error.clone(),
                )
                .await;
        }

        result
    }

    /// Closed dispatch by approach.
    async fn dispatch(&self, context: &Value, subtask: &Subtask, timeout: Duration) -> SubagentResult {
        // A concrete action resolved at decomposition time goes straight to
        // the executor, whatever the approach
        if let SubtaskContext::Input {
            action,
            post_action_wait_ms,
        } = &subtask.context
        {
            let started = Instant::now();
            let outcome = self.executor.perform(action).await;
            if outcome.success {
                if *post_action_wait_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(*post_action_wait_ms)).await;
                }
                return SubagentResult::success(
                    json!({"action": action.action_type}),
                    started.elapsed(),
                );
            }
            return SubagentResult::failure(
                outcome
                    .error
                    .unwrap_or_else(|| format!("action '{}' failed", action.action_type)),
                started.elapsed(),
            );
        }

        match subtask.approach {
            // A named input approach without a resolved action still goes
            // straight to the executor: the descriptor carries the approach
            // tag and the step description for it to interpret
            Approach::Keyboard | Approach::Mouse => {
                let started = Instant::now();
                let action = crate::domain::models::ActionDescriptor::new(
                    subtask.approach.as_str(),
                    json!({"description": subtask.description}),
                );
                let outcome = self.executor.perform(&action).await;
                if outcome.success {
                    SubagentResult::success(
                        json!({"action": action.action_type}),
                        started.elapsed(),
                    )
                } else {
                    SubagentResult::failure(
                        outcome
                            .error
                            .unwrap_or_else(|| format!("{} action failed", subtask.approach)),
                        started.elapsed(),
                    )
                }
            }
            // No concrete action and no committed input style: fan out over
            // the candidate strategies and let aggregation decide
            Approach::Hybrid => {
                let variants = ["keyboard", "mouse", "hybrid"]
                    .iter()
                    .map(|strategy| {
                        json!({"goal": subtask.description, "strategy": strategy})
                    })
                    .collect();
                self.manager
                    .spawn_parallel(WorkerFamily::Planning, variants, Some(timeout))
                    .await
            }
            Approach::Vision => {
                let target = match &subtask.context {
                    SubtaskContext::Vision { target } => Value::from(target.clone()),
                    _ => Value::Null,
                };
                self.manager
                    .call_single(
                        WorkerFamily::Vision,
                        json!({"description": subtask.description, "target": target}),
                        Some(timeout),
                    )
                    .await
            }
            Approach::Specialist => {
                let query = match &subtask.context {
                    SubtaskContext::Specialist { query } => query.clone(),
                    _ => subtask.description.clone(),
                };
                self.manager
                    .call_single(
                        WorkerFamily::Specialist,
                        json!({"query": query}),
                        Some(timeout),
                    )
                    .await
            }
            Approach::Orchestrator => {
                let started = Instant::now();
                let outcome = self.reflector.run(&subtask.description, context).await;
                if outcome.success {
                    SubagentResult::success(
                        json!({"actions_executed": outcome.actions_executed}),
                        started.elapsed(),
                    )
                } else {
                    SubagentResult::failure(
                        outcome
                            .error
                            .unwrap_or_else(|| "reflection loop failed".to_string()),
                        started.elapsed(),
                    )
                }
            }
        }
    }
}

#[derive(Default)]
struct PlanRun {
    results: HashMap<Uuid, SubagentResult>,
    attempted: HashSet<Uuid>,
    completed: HashSet<Uuid>,
    failed: HashSet<Uuid>,
    aborted: bool,
    cancelled: bool,
    abort_reason: Option<String>,
}

fn build_result(
    task_id: Uuid,
    state: TaskState,
    subtasks: &[Subtask],
    results: HashMap<Uuid, SubagentResult>,
    abort_reason: Option<String>,
    duration: Duration,
) -> AutomationResult {
    let completed = results.values().filter(|r| r.success).count();
    let total = subtasks.len();

    let failures: Vec<&str> = subtasks
        .iter()
        .filter(|s| results.get(&s.id).is_some_and(|r| !r.success))
        .map(|s| s.description.as_str())
        .collect();

    let mut summary = format!("{completed}/{total} subtasks succeeded");
    if !failures.is_empty() {
        summary.push_str("; failed: ");
        summary.push_str(&failures.join(", "));
    }
    if state == TaskState::Cancelled {
        summary.push_str("; cancelled");
    }

    let error = match state {
        TaskState::Failed => {
            Some(abort_reason.unwrap_or_else(|| "automation failed".to_string()))
        }
        _ => None,
    };

    AutomationResult {
        task_id,
        success: state == TaskState::Completed,
        subtasks_completed: completed,
        subtasks_total: total,
        duration,
        results,
        summary,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ActionDescriptor, AggregationConfig, BusConfig, ManagerConfig, SchedulerConfig,
        WorkerResponse,
    };
    use crate::domain::ports::{ActionOutcome, MessageBus, ReflectionOutcome};
    use crate::infrastructure::bus::{BusClient, InMemoryBus};
    use crate::services::aggregator::ResultAggregator;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingExecutor {
        performed: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl ActionExecutor for CountingExecutor {
        async fn perform(&self, _action: &ActionDescriptor) -> ActionOutcome {
            self.performed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                ActionOutcome::failed("input device busy")
            } else {
                ActionOutcome::ok()
            }
        }
    }

    struct NoopReflector;

    #[async_trait]
    impl ReflectionLoop for NoopReflector {
        async fn run(&self, _goal: &str, _context: &Value) -> ReflectionOutcome {
            ReflectionOutcome {
                success: true,
                actions_executed: 1,
                error: None,
            }
        }
    }

    async fn engine_with(executor: Arc<CountingExecutor>) -> (Arc<BusClient>, AutomationEngine) {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::default());
        let client = Arc::new(
            BusClient::connect(bus, BusConfig::default()).await.unwrap(),
        );
        let manager = Arc::new(SubagentManager::new(
            Arc::clone(&client),
            ResultAggregator::new(AggregationConfig::default()),
            ManagerConfig::default(),
        ));
        let engine = AutomationEngine::new(
            Arc::new(SubtaskDecomposer::new()),
            TaskScheduler::new(SchedulerConfig::default()),
            manager,
            Arc::new(ProgressTracker::default()),
            executor,
            Arc::new(NoopReflector),
            EngineConfig::default(),
        );
        (client, engine)
    }

    fn vision_worker(client: &Arc<BusClient>) -> tokio::task::JoinHandle<()> {
        client.spawn_worker(WorkerFamily::Vision, "vision", "v1", |req| async move {
            WorkerResponse {
                task_id: req.task_id,
                success: true,
                result: json!({"elements": [], "analysis": "window visible", "confidence": 0.9}),
                error: None,
            }
        })
    }

    #[tokio::test]
    async fn test_pattern_goal_runs_to_completion() {
        let executor = Arc::new(CountingExecutor {
            performed: AtomicU32::new(0),
            fail: false,
        });
        let (client, engine) = engine_with(Arc::clone(&executor)).await;
        let worker = vision_worker(&client);

        let result = engine.execute_complex_task("open notepad", json!({})).await;

        assert!(result.success, "summary: {}", result.summary);
        assert_eq!(result.subtasks_total, 4);
        assert_eq!(result.subtasks_completed, 4);
        // Three concrete input steps reached the executor
        assert_eq!(executor.performed.load(Ordering::SeqCst), 3);
        assert!(result.summary.starts_with("4/4"));
        worker.abort();
    }

    #[tokio::test]
    async fn test_first_step_failure_aborts_plan() {
        let executor = Arc::new(CountingExecutor {
            performed: AtomicU32::new(0),
            fail: true,
        });
        let (_client, engine) = engine_with(executor).await;

        let result = engine.execute_complex_task("open notepad", json!({})).await;

        assert!(!result.success);
        assert_eq!(result.subtasks_completed, 0);
        assert!(result.error.is_some());
        assert!(result.summary.contains("failed"));
    }

    #[tokio::test]
    async fn test_finished_task_is_queryable() {
        let executor = Arc::new(CountingExecutor {
            performed: AtomicU32::new(0),
            fail: false,
        });
        let (client, engine) = engine_with(executor).await;
        let worker = vision_worker(&client);

        let result = engine.execute_complex_task("open calc", json!({})).await;

        assert_eq!(
            engine.state_of(result.task_id).await,
            Some(TaskState::Completed)
        );
        let stored = engine.result_of(result.task_id).await.unwrap();
        assert_eq!(stored.subtasks_total, result.subtasks_total);
        assert!(engine.active_tasks().await.is_empty());
        worker.abort();
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_false() {
        let executor = Arc::new(CountingExecutor {
            performed: AtomicU32::new(0),
            fail: false,
        });
        let (_client, engine) = engine_with(executor).await;
        assert!(!engine.cancel_task(Uuid::new_v4()).await);
    }
}
