//! Result and state types for worker calls and whole-goal runs.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Worker family, one bus topic per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFamily {
    Planning,
    Vision,
    Specialist,
    Background,
    Decomposition,
}

impl WorkerFamily {
    /// The bus topic this family consumes.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Vision => "vision",
            Self::Specialist => "specialist",
            Self::Background => "background",
            Self::Decomposition => "decomposition",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "vision" => Some(Self::Vision),
            "specialist" => Some(Self::Specialist),
            "background" => Some(Self::Background),
            "decomposition" => Some(Self::Decomposition),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.topic())
    }
}

/// Correlated request published to a worker family topic.
///
/// `task_id` is the correlation key: the matching [`WorkerResponse`] carries
/// the same id on the shared results topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: Uuid,
    pub params: Value,
    /// Client name, for worker-side logging only.
    pub requester: String,
    /// Advisory budget the worker should stay within.
    pub timeout_secs: u64,
}

/// Correlated response published to the shared results topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub task_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// The unit the aggregator operates on: one worker's answer to one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    /// Worker-reported confidence in `[0, 1]`; 0 when absent or failed.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub execution_time: Duration,
}

impl SubagentResult {
    /// A failed result carrying only an error message.
    pub fn failure(error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            success: false,
            result: Value::Null,
            confidence: 0.0,
            error: Some(error.into()),
            execution_time,
        }
    }

    /// A successful result; confidence is read from the payload's
    /// `confidence` field when present.
    pub fn success(result: Value, execution_time: Duration) -> Self {
        let confidence = result
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Self {
            success: true,
            result,
            confidence,
            error: None,
            execution_time,
        }
    }
}

/// Lifecycle of one in-flight goal in the automation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Decomposing,
    Scheduling,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Decomposing => "decomposing",
            Self::Scheduling => "scheduling",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final outcome of one goal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationResult {
    pub task_id: Uuid,
    /// True only when the run reached [`TaskState::Completed`].
    pub success: bool,
    pub subtasks_completed: usize,
    pub subtasks_total: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Per-subtask results keyed by subtask id.
    pub results: HashMap<Uuid, SubagentResult>,
    /// Short human-readable tally of successes vs. named failures.
    pub summary: String,
    #[serde(default)]
    pub error: Option<String>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(v: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(v.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
