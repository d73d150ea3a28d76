//! Maestro - Coordination core for desktop automation agents
//!
//! Maestro decomposes a high-level automation goal into a graph of dependent
//! subtasks, schedules them into ordered phases that respect dependencies
//! while maximizing safe parallelism, dispatches each subtask to a pool of
//! specialized workers over a shared message bus, and aggregates the worker
//! responses into a single decision. It has no knowledge of screens, pixels,
//! or keystrokes: the concrete worker logic, the primitive-action executor,
//! and the bus engine are external collaborators reached through ports.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, ports, and domain errors
//! - **Service Layer** (`services`): decomposer, scheduler, aggregator,
//!   subagent manager, progress tracker, and the automation engine
//! - **Infrastructure Layer** (`infrastructure`): bus client and reference
//!   in-memory bus, configuration loading, logging setup
//!
//! # Example
//!
//! ```ignore
//! use maestro::services::AutomationEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Compose bus, manager, and engine at the application root
//!     Ok(())
//! }
//! ```

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    ActionDescriptor, Approach, AutomationResult, BackgroundMonitor, Config, ExecutionPhase,
    ExecutionPlan, SubagentResult, Subtask, SubtaskContext, SubtaskStatus, TaskProgress,
    TaskState, WorkerFamily, WorkerRequest, WorkerResponse,
};
pub use domain::ports::{ActionExecutor, ActionOutcome, MessageBus, ReflectionLoop};
pub use infrastructure::bus::{BusClient, InMemoryBus};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AggregationStrategy, AutomationEngine, ProgressTracker, ResultAggregator, SubagentManager,
    SubtaskDecomposer, TaskScheduler,
};
