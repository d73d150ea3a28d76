//! Service layer: the coordination components themselves.

pub mod aggregator;
pub mod decomposer;
pub mod engine;
pub mod progress_tracker;
pub mod scheduler;
pub mod subagent_manager;

pub use aggregator::{AggregationStrategy, ResultAggregator};
pub use decomposer::SubtaskDecomposer;
pub use engine::{AutomationEngine, RunningTask};
pub use progress_tracker::{ProgressEvent, ProgressTracker};
pub use scheduler::TaskScheduler;
pub use subagent_manager::{MonitorCallback, SubagentManager};
