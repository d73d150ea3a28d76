//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async trait interfaces the coordination core
//! consumes but does not implement:
//! - `MessageBus`: topic streams with consumer groups and broadcast reads
//! - `ActionExecutor`: performs one primitive action on the target system
//! - `ReflectionLoop`: the opaque collaborator behind the `orchestrator`
//!   approach
//!
//! These traits keep the domain independent of the concrete bus engine and
//! of anything that touches screens or input devices.

pub mod executor;
pub mod message_bus;
pub mod reflection;

pub use executor::{ActionExecutor, ActionOutcome};
pub use message_bus::{BusMessage, MessageBus, MessageId};
pub use reflection::{ReflectionLoop, ReflectionOutcome};
