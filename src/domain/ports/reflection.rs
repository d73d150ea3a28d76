//! Reflection-loop collaborator port (the `orchestrator` approach).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one reflection-loop run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    pub success: bool,
    pub actions_executed: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Runs its own observe-plan-act loop for a goal the core cannot decompose
/// further. Opaque beyond this contract.
#[async_trait]
pub trait ReflectionLoop: Send + Sync {
    async fn run(&self, goal: &str, context: &Value) -> ReflectionOutcome;
}
