//! Task scheduler: turns a subtask batch into an execution plan.
//!
//! Subtasks are peeled into dependency levels (level 0 has no remaining
//! dependencies, level k depends only on levels below), each level becomes
//! one or more phases, and phases are marked parallel only when that is
//! safe for input-focus contention.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{ExecutionPhase, ExecutionPlan, SchedulerConfig, Subtask};

/// Service producing execution plans from decomposed subtasks.
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler {
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build an execution plan. Empty input yields an empty plan.
    ///
    /// Dependency ids that do not exist in the input batch are dropped, not
    /// errors. If at some point no subtask can be leveled (a dependency
    /// cycle, or a dangling reference to an id deleted mid-batch), leveling
    /// stops and *all* not-yet-leveled subtasks are flushed into one final,
    /// sequential phase. That trailing group no longer honors the
    /// dependency guarantee. This matches the behavior the calling engine
    /// expects — it wants *a* plan, not an error — so it is kept
    /// deliberately and logged as an anomaly. Do not change it to a hard
    /// failure without re-confirming the engine's semantics.
    pub fn create_plan(&self, subtasks: &[Subtask]) -> ExecutionPlan {
        if subtasks.is_empty() {
            return ExecutionPlan::empty();
        }

        let known_ids: HashSet<Uuid> = subtasks.iter().map(|s| s.id).collect();

        // Dependencies restricted to ids actually present in this batch
        let deps_of: HashMap<Uuid, Vec<Uuid>> = subtasks
            .iter()
            .map(|s| {
                let deps: Vec<Uuid> = s
                    .dependencies
                    .iter()
                    .filter(|d| known_ids.contains(d))
                    .copied()
                    .collect();
                (s.id, deps)
            })
            .collect();

        let mut remaining: Vec<&Subtask> = subtasks.iter().collect();
        let mut leveled: HashSet<Uuid> = HashSet::new();
        let mut levels: Vec<Vec<Subtask>> = Vec::new();
        let mut flushed = false;

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Subtask>, Vec<&Subtask>) = remaining
                .into_iter()
                .partition(|s| deps_of[&s.id].iter().all(|d| leveled.contains(d)));

            if ready.is_empty() {
                // Cycle or reference to a deleted id: flush the rest
                warn!(
                    stuck = blocked.len(),
                    "Dependency cycle or unresolvable reference; flushing remaining \
                     subtasks into a final sequential phase"
                );
                let mut rest: Vec<Subtask> = blocked.into_iter().cloned().collect();
                rest.sort_by_key(|s| s.order);
                levels.push(rest);
                flushed = true;
                break;
            }

            let mut level: Vec<Subtask> = ready.into_iter().cloned().collect();
            level.sort_by_key(|s| s.order);
            leveled.extend(level.iter().map(|s| s.id));
            levels.push(level);
            remaining = blocked;
        }

        let mut phases = Vec::new();
        let level_count = levels.len();
        for (idx, level) in levels.into_iter().enumerate() {
            let is_flushed_tail = flushed && idx == level_count - 1;
            self.push_phases(&mut phases, level, is_flushed_tail);
        }

        let estimated_duration = phases.iter().map(|p: &ExecutionPhase| p.timeout).sum();
        let plan = ExecutionPlan {
            phases,
            total_subtasks: subtasks.len(),
            estimated_duration,
        };

        debug!(
            subtasks = plan.total_subtasks,
            phases = plan.phase_count(),
            "Created execution plan"
        );
        plan
    }

    /// Rebuild a fresh plan from the subtasks of `plan` that have not
    /// completed, dropping completed ids from every dependency set first.
    ///
    /// Failed subtasks are not completed: they re-enter the new plan.
    pub fn replan(
        &self,
        plan: &ExecutionPlan,
        completed_ids: &HashSet<Uuid>,
        failed_ids: &HashSet<Uuid>,
    ) -> ExecutionPlan {
        let mut remaining: Vec<Subtask> = plan
            .phases
            .iter()
            .flat_map(|p| p.subtasks.iter())
            .filter(|s| !completed_ids.contains(&s.id))
            .cloned()
            .collect();

        for subtask in &mut remaining {
            subtask.prune_dependencies(completed_ids);
        }

        debug!(
            remaining = remaining.len(),
            completed = completed_ids.len(),
            failed = failed_ids.len(),
            "Re-planning from checkpoint"
        );

        self.create_plan(&remaining)
    }

    /// Turn one dependency level into phases, splitting oversized parallel
    /// levels into consecutive chunks of the configured max fan-out.
    fn push_phases(
        &self,
        phases: &mut Vec<ExecutionPhase>,
        level: Vec<Subtask>,
        force_sequential: bool,
    ) {
        let parallel = !force_sequential && self.is_parallelizable(&level);

        let chunks: Vec<Vec<Subtask>> = if parallel && level.len() > self.config.max_parallel {
            level
                .chunks(self.config.max_parallel)
                .map(<[Subtask]>::to_vec)
                .collect()
        } else {
            vec![level]
        };

        for chunk in chunks {
            // A split can leave a tail too small to run in parallel
            let can_parallel = parallel && chunk.len() > 1;
            let timeout = self.phase_timeout(&chunk, can_parallel);
            phases.push(ExecutionPhase {
                phase_id: phases.len() + 1,
                subtasks: chunk,
                can_parallel,
                timeout,
            });
        }
    }

    /// A level runs in parallel only when somebody asked for it and at most
    /// one member needs exclusive control of the input focus.
    fn is_parallelizable(&self, level: &[Subtask]) -> bool {
        if level.len() <= 1 {
            return false;
        }
        let opted_in = level.iter().any(|s| s.can_parallel);
        let exclusive = level.iter().filter(|s| s.approach.is_exclusive()).count();
        opted_in && exclusive <= 1
    }

    fn phase_timeout(&self, subtasks: &[Subtask], parallel: bool) -> Duration {
        let default = self.config.default_subtask_timeout();
        let member = |s: &Subtask| s.timeout.unwrap_or(default);

        if parallel {
            let max = subtasks.iter().map(member).max().unwrap_or(default);
            max.mul_f64(self.config.parallel_timeout_factor)
        } else {
            subtasks.iter().map(member).sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Approach;

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig::default())
    }

    fn chain(approaches: &[Approach]) -> Vec<Subtask> {
        let mut subtasks: Vec<Subtask> = Vec::new();
        for (i, &approach) in approaches.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let mut s = Subtask::new(format!("step {i}"), approach, i as u32);
            if let Some(prev) = subtasks.last() {
                s.dependencies = vec![prev.id];
            }
            subtasks.push(s);
        }
        subtasks
    }

    #[test]
    fn test_empty_input_yields_empty_plan() {
        let plan = scheduler().create_plan(&[]);
        assert!(plan.is_empty());
        assert_eq!(plan.total_subtasks, 0);
    }

    #[test]
    fn test_chain_becomes_sequential_single_phases() {
        let subtasks = chain(&[
            Approach::Keyboard,
            Approach::Keyboard,
            Approach::Keyboard,
            Approach::Vision,
        ]);
        let plan = scheduler().create_plan(&subtasks);

        assert_eq!(plan.phase_count(), 4);
        for (i, phase) in plan.phases.iter().enumerate() {
            assert_eq!(phase.phase_id, i + 1);
            assert_eq!(phase.subtask_count(), 1);
            assert!(!phase.can_parallel);
        }
        assert_eq!(plan.all_subtask_ids(), subtasks.iter().map(|s| s.id).collect::<Vec<_>>());
    }

    #[test]
    fn test_diamond_topology() {
        let root = Subtask::new("open", Approach::Hybrid, 0);
        let left = Subtask::new("read left pane", Approach::Vision, 1)
            .with_dependencies(vec![root.id])
            .with_can_parallel(true);
        let right = Subtask::new("read right pane", Approach::Vision, 2)
            .with_dependencies(vec![root.id])
            .with_can_parallel(true);
        let join = Subtask::new("summarize", Approach::Orchestrator, 3)
            .with_dependencies(vec![left.id, right.id]);

        let plan = scheduler().create_plan(&[root.clone(), left.clone(), right.clone(), join.clone()]);

        assert_eq!(plan.phase_count(), 3);
        assert!(plan.phases[1].can_parallel);
        assert!(plan.phase_index_of(join.id) > plan.phase_index_of(left.id));
        assert!(plan.phase_index_of(left.id) > plan.phase_index_of(root.id));
    }

    #[test]
    fn test_two_exclusive_approaches_never_parallel() {
        let a = Subtask::new("type here", Approach::Keyboard, 0).with_can_parallel(true);
        let b = Subtask::new("type there", Approach::Keyboard, 1).with_can_parallel(true);

        let plan = scheduler().create_plan(&[a, b]);
        for phase in &plan.phases {
            assert!(!phase.can_parallel);
        }
    }

    #[test]
    fn test_one_exclusive_plus_observers_is_parallel() {
        let typing = Subtask::new("type", Approach::Keyboard, 0).with_can_parallel(true);
        let watch = Subtask::new("watch", Approach::Vision, 1).with_can_parallel(true);
        let lookup = Subtask::new("lookup", Approach::Specialist, 2).with_can_parallel(true);

        let plan = scheduler().create_plan(&[typing, watch, lookup]);
        assert_eq!(plan.phase_count(), 1);
        assert!(plan.phases[0].can_parallel);
    }

    #[test]
    fn test_nobody_opted_in_stays_sequential() {
        let a = Subtask::new("read a", Approach::Vision, 0);
        let b = Subtask::new("read b", Approach::Vision, 1);

        let plan = scheduler().create_plan(&[a, b]);
        assert!(!plan.phases[0].can_parallel);
    }

    #[test]
    fn test_fanout_split() {
        let subtasks: Vec<Subtask> = (0..6)
            .map(|i| Subtask::new(format!("read {i}"), Approach::Vision, i).with_can_parallel(true))
            .collect();

        let plan = scheduler().create_plan(&subtasks);

        assert_eq!(plan.phase_count(), 2);
        assert_eq!(plan.phases[0].subtask_count(), 4);
        assert!(plan.phases[0].can_parallel);
        assert_eq!(plan.phases[1].subtask_count(), 2);
        assert!(plan.phases[1].can_parallel);
        assert_eq!(plan.total_subtasks, 6);
    }

    #[test]
    fn test_dangling_dependency_is_dropped() {
        let mut lone = Subtask::new("verify", Approach::Vision, 0);
        lone.dependencies = vec![Uuid::new_v4()];

        let plan = scheduler().create_plan(&[lone]);
        assert_eq!(plan.phase_count(), 1);
    }

    #[test]
    fn test_cycle_flushes_into_one_final_sequential_phase() {
        let mut a = Subtask::new("a", Approach::Keyboard, 0);
        let mut b = Subtask::new("b", Approach::Keyboard, 1);
        let mut c = Subtask::new("c", Approach::Vision, 2);
        a.dependencies = vec![b.id];
        b.dependencies = vec![a.id];
        c.dependencies = vec![a.id];

        let plan = scheduler().create_plan(&[a.clone(), b.clone(), c.clone()]);

        assert_eq!(plan.phase_count(), 1);
        assert_eq!(plan.phases[0].subtask_count(), 3);
        assert!(!plan.phases[0].can_parallel);
    }

    #[test]
    fn test_sequential_timeout_is_sum() {
        let a = Subtask::new("a", Approach::Keyboard, 0).with_timeout(Duration::from_secs(10));
        let mut b = Subtask::new("b", Approach::Keyboard, 1).with_timeout(Duration::from_secs(20));
        b.dependencies = vec![a.id];

        let plan = scheduler().create_plan(&[a, b]);
        // Two single-member phases of 10s and 20s
        assert_eq!(plan.phases[0].timeout, Duration::from_secs(10));
        assert_eq!(plan.phases[1].timeout, Duration::from_secs(20));
        assert_eq!(plan.estimated_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_parallel_timeout_is_scaled_max() {
        let a = Subtask::new("a", Approach::Vision, 0)
            .with_can_parallel(true)
            .with_timeout(Duration::from_secs(10));
        let b = Subtask::new("b", Approach::Vision, 1)
            .with_can_parallel(true)
            .with_timeout(Duration::from_secs(40));

        let plan = scheduler().create_plan(&[a, b]);
        assert_eq!(plan.phase_count(), 1);
        assert_eq!(plan.phases[0].timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_replan_prunes_completed_dependencies() {
        let subtasks = chain(&[Approach::Keyboard, Approach::Keyboard, Approach::Vision]);
        let plan = scheduler().create_plan(&subtasks);

        let completed = HashSet::from([subtasks[0].id]);
        let failed = HashSet::new();
        let replanned = scheduler().replan(&plan, &completed, &failed);

        assert_eq!(replanned.total_subtasks, 2);
        // The old second step now has no dependencies and levels first
        assert_eq!(replanned.phases[0].subtasks[0].id, subtasks[1].id);
        assert!(replanned.phases[0].subtasks[0].dependencies.is_empty());
    }

    #[test]
    fn test_replan_keeps_failed_subtasks() {
        let subtasks = chain(&[Approach::Keyboard, Approach::Vision]);
        let plan = scheduler().create_plan(&subtasks);

        let completed = HashSet::new();
        let failed = HashSet::from([subtasks[0].id]);
        let replanned = scheduler().replan(&plan, &completed, &failed);

        assert_eq!(replanned.total_subtasks, 2);
    }
}
