//! Primitive-action executor port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::ActionDescriptor;

/// Outcome of performing one primitive action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Performs one concrete action on the target system.
///
/// The engine treats this as synchronous from its perspective but always
/// awaits it under the owning subtask's timeout.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(&self, action: &ActionDescriptor) -> ActionOutcome;
}
