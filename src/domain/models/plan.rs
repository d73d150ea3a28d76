//! Execution plan produced by the task scheduler.
//!
//! A plan partitions one decomposition batch into ordered phases. The phase
//! ordering is a valid topological order: every subtask's dependencies lie
//! in a strictly lower phase.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subtask::Subtask;

/// A scheduler-assigned batch of subtasks executed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPhase {
    /// 1-based, dense phase number.
    pub phase_id: usize,
    /// Subtasks in execution order (relevant when the phase is sequential).
    pub subtasks: Vec<Subtask>,
    /// Whether members run concurrently or strictly in list order.
    pub can_parallel: bool,
    /// Phase budget: max member timeout x1.5 when parallel, sum of member
    /// timeouts when sequential.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ExecutionPhase {
    pub fn subtask_count(&self) -> usize {
        self.subtasks.len()
    }

    pub fn subtask_ids(&self) -> Vec<Uuid> {
        self.subtasks.iter().map(|s| s.id).collect()
    }
}

/// The ordered sequence of phases covering all subtasks of one decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub phases: Vec<ExecutionPhase>,
    pub total_subtasks: usize,
    /// Rough wall-clock estimate: the sum of phase budgets.
    #[serde(with = "duration_secs")]
    pub estimated_duration: Duration,
}

impl ExecutionPlan {
    pub fn empty() -> Self {
        Self {
            phases: Vec::new(),
            total_subtasks: 0,
            estimated_duration: Duration::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    /// All subtask ids across phases, in phase order.
    pub fn all_subtask_ids(&self) -> Vec<Uuid> {
        self.phases
            .iter()
            .flat_map(|p| p.subtasks.iter().map(|s| s.id))
            .collect()
    }

    /// Index of the phase holding `id`, if any.
    pub fn phase_index_of(&self, id: Uuid) -> Option<usize> {
        self.phases
            .iter()
            .position(|p| p.subtasks.iter().any(|s| s.id == id))
    }

    /// Check plan structure: dense 1-based phase ids, no duplicate subtask
    /// ids, no empty phases.
    ///
    /// Note this deliberately does not check the topological invariant; the
    /// cycle-flush policy in the scheduler can legally produce a trailing
    /// phase that violates it (see `TaskScheduler::create_plan`).
    pub fn validate(&self) -> Result<(), String> {
        for (idx, phase) in self.phases.iter().enumerate() {
            if phase.phase_id != idx + 1 {
                return Err(format!(
                    "Phase at index {} has non-dense id {}",
                    idx, phase.phase_id
                ));
            }
            if phase.subtasks.is_empty() {
                return Err(format!("Phase {} is empty", phase.phase_id));
            }
        }

        let all_ids = self.all_subtask_ids();
        if all_ids.len() != self.total_subtasks {
            return Err(format!(
                "Plan claims {} subtasks but holds {}",
                self.total_subtasks,
                all_ids.len()
            ));
        }

        let mut seen = HashSet::new();
        for id in &all_ids {
            if !seen.insert(id) {
                return Err(format!("Duplicate subtask id in plan: {id}"));
            }
        }

        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(v.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::subtask::Approach;

    fn phase(phase_id: usize, subtasks: Vec<Subtask>) -> ExecutionPhase {
        ExecutionPhase {
            phase_id,
            subtasks,
            can_parallel: false,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_validate_ok() {
        let plan = ExecutionPlan {
            phases: vec![
                phase(1, vec![Subtask::new("a", Approach::Keyboard, 0)]),
                phase(2, vec![Subtask::new("b", Approach::Vision, 1)]),
            ],
            total_subtasks: 2,
            estimated_duration: Duration::from_secs(60),
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_sparse_phase_ids() {
        let plan = ExecutionPlan {
            phases: vec![phase(2, vec![Subtask::new("a", Approach::Keyboard, 0)])],
            total_subtasks: 1,
            estimated_duration: Duration::from_secs(30),
        };
        assert!(plan.validate().unwrap_err().contains("non-dense"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let subtask = Subtask::new("a", Approach::Keyboard, 0);
        let plan = ExecutionPlan {
            phases: vec![
                phase(1, vec![subtask.clone()]),
                phase(2, vec![subtask]),
            ],
            total_subtasks: 2,
            estimated_duration: Duration::from_secs(60),
        };
        assert!(plan.validate().unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn test_phase_index_of() {
        let first = Subtask::new("a", Approach::Keyboard, 0);
        let second = Subtask::new("b", Approach::Vision, 1);
        let missing = Uuid::new_v4();

        let plan = ExecutionPlan {
            phases: vec![phase(1, vec![first.clone()]), phase(2, vec![second.clone()])],
            total_subtasks: 2,
            estimated_duration: Duration::from_secs(60),
        };

        assert_eq!(plan.phase_index_of(first.id), Some(0));
        assert_eq!(plan.phase_index_of(second.id), Some(1));
        assert_eq!(plan.phase_index_of(missing), None);
    }
}
