pub mod config;
pub mod monitor;
pub mod outcome;
pub mod plan;
pub mod progress;
pub mod subtask;

pub use config::{
    AggregationConfig, BusConfig, Config, EngineConfig, LoggingConfig, ManagerConfig,
    SchedulerConfig,
};
pub use monitor::BackgroundMonitor;
pub use outcome::{
    AutomationResult, SubagentResult, TaskState, WorkerFamily, WorkerRequest, WorkerResponse,
};
pub use plan::{ExecutionPhase, ExecutionPlan};
pub use progress::{SubtaskProgress, SubtaskStatus, TaskProgress};
pub use subtask::{ActionDescriptor, Approach, Subtask, SubtaskContext};
