//! Subtask domain model.
//!
//! Subtasks are discrete units of automation work produced by goal
//! decomposition. They form a DAG through their dependency sets and are
//! read-only once scheduled, except for dependency pruning during
//! re-planning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Execution approach for a subtask.
///
/// Keyboard, mouse, and hybrid contend for the same physical input focus on
/// the target desktop and therefore exclude each other within a parallel
/// phase. Vision and specialist work are read-only from the desktop's point
/// of view and never block parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    /// Keystroke-driven input.
    Keyboard,
    /// Pointer-driven input.
    Mouse,
    /// Mixed keyboard and mouse input.
    Hybrid,
    /// Screen reading / verification.
    Vision,
    /// Domain knowledge lookup (shortcuts, workflows).
    Specialist,
    /// Delegated to the external reflection-loop collaborator.
    Orchestrator,
}

impl Default for Approach {
    fn default() -> Self {
        Self::Orchestrator
    }
}

impl Approach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyboard => "keyboard",
            Self::Mouse => "mouse",
            Self::Hybrid => "hybrid",
            Self::Vision => "vision",
            Self::Specialist => "specialist",
            Self::Orchestrator => "orchestrator",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "keyboard" => Some(Self::Keyboard),
            "mouse" => Some(Self::Mouse),
            "hybrid" => Some(Self::Hybrid),
            "vision" => Some(Self::Vision),
            "specialist" => Some(Self::Specialist),
            "orchestrator" => Some(Self::Orchestrator),
            _ => None,
        }
    }

    /// Whether this approach requires exclusive control of the input focus.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Keyboard | Self::Mouse | Self::Hybrid)
    }
}

impl std::fmt::Display for Approach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One concrete low-level action, opaque to the coordination core.
///
/// Produced by action-level decomposition and consumed by the external
/// primitive executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Executor-defined action tag (e.g. `press_keys`, `type_text`).
    pub action_type: String,
    /// Executor-defined parameters.
    #[serde(default)]
    pub params: Value,
}

impl ActionDescriptor {
    pub fn new(action_type: impl Into<String>, params: Value) -> Self {
        Self {
            action_type: action_type.into(),
            params,
        }
    }
}

/// Worker-specific side-channel attached to a subtask.
///
/// One variant per approach family so mismatches are caught at compile time
/// rather than at dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubtaskContext {
    /// No hints attached.
    #[default]
    Empty,
    /// Concrete input action resolved during decomposition, plus how long to
    /// wait after performing it before the next step may start.
    Input {
        action: ActionDescriptor,
        #[serde(default)]
        post_action_wait_ms: u64,
    },
    /// Target hint for vision verification (window title, element name).
    Vision { target: String },
    /// Query hint for specialist lookups.
    Specialist { query: String },
    /// Free-form hints passed through to workers untouched.
    Extra(serde_json::Map<String, Value>),
}

impl SubtaskContext {
    /// The concrete action, if one was attached during decomposition.
    pub fn action(&self) -> Option<&ActionDescriptor> {
        match self {
            Self::Input { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// One unit of automation work with a declared approach and dependency set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub description: String,
    pub approach: Approach,
    /// Ids of subtasks from the same decomposition batch that must reach a
    /// terminal state before this one starts. Pruned during re-planning.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Whether this subtask may share a parallel phase with others.
    #[serde(default)]
    pub can_parallel: bool,
    /// Per-subtask execution timeout; the scheduler substitutes its
    /// configured default when unset.
    #[serde(default, with = "opt_duration_secs")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub context: SubtaskContext,
    /// Position within the decomposition batch, used for deterministic
    /// ordering inside a scheduling level.
    pub order: u32,
}

impl Subtask {
    /// Create a subtask with a fresh id and no dependencies.
    pub fn new(description: impl Into<String>, approach: Approach, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            approach,
            dependencies: Vec::new(),
            can_parallel: false,
            timeout: None,
            context: SubtaskContext::Empty,
            order,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_can_parallel(mut self, can_parallel: bool) -> Self {
        self.can_parallel = can_parallel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context(mut self, context: SubtaskContext) -> Self {
        self.context = context;
        self
    }

    /// Drop any dependency ids contained in `completed`.
    pub fn prune_dependencies(&mut self, completed: &std::collections::HashSet<Uuid>) {
        self.dependencies.retain(|id| !completed.contains(id));
    }
}

mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approach_roundtrip() {
        for approach in [
            Approach::Keyboard,
            Approach::Mouse,
            Approach::Hybrid,
            Approach::Vision,
            Approach::Specialist,
            Approach::Orchestrator,
        ] {
            assert_eq!(Approach::from_str(approach.as_str()), Some(approach));
        }
        assert_eq!(Approach::from_str("telepathy"), None);
    }

    #[test]
    fn test_exclusive_approaches() {
        assert!(Approach::Keyboard.is_exclusive());
        assert!(Approach::Mouse.is_exclusive());
        assert!(Approach::Hybrid.is_exclusive());
        assert!(!Approach::Vision.is_exclusive());
        assert!(!Approach::Specialist.is_exclusive());
        assert!(!Approach::Orchestrator.is_exclusive());
    }

    #[test]
    fn test_prune_dependencies() {
        let done = Uuid::new_v4();
        let open = Uuid::new_v4();
        let mut subtask = Subtask::new("verify dialog", Approach::Vision, 1)
            .with_dependencies(vec![done, open]);

        let completed = std::collections::HashSet::from([done]);
        subtask.prune_dependencies(&completed);

        assert_eq!(subtask.dependencies, vec![open]);
    }

    #[test]
    fn test_subtask_serde_roundtrip() {
        let subtask = Subtask::new("type report title", Approach::Keyboard, 3)
            .with_timeout(Duration::from_secs(15))
            .with_context(SubtaskContext::Input {
                action: ActionDescriptor::new(
                    "type_text",
                    serde_json::json!({"text": "Quarterly Report"}),
                ),
                post_action_wait_ms: 250,
            });

        let json = serde_json::to_string(&subtask).unwrap();
        let back: Subtask = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, subtask.id);
        assert_eq!(back.timeout, Some(Duration::from_secs(15)));
        assert_eq!(back.context, subtask.context);
    }
}
