//! Domain errors for the Maestro coordination core.

use thiserror::Error;

/// Domain-level errors.
///
/// These surface only at the bus and infrastructure seams. Nothing inside
/// phase or subtask execution is allowed to raise past the engine boundary:
/// dispatch timeouts, worker failures, and executor failures are all
/// converted into failed results or state transitions instead.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The bus engine rejected or lost an operation. Stricter adapters than
    /// the in-memory bus (an external broker, say) report their transport
    /// failures through this.
    #[error("Bus error: {0}")]
    BusError(String),

    /// A group or broadcast operation referenced a topic the bus refuses to
    /// create implicitly.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
