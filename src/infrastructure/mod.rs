//! Infrastructure layer: bus plumbing, configuration, logging.

pub mod bus;
pub mod config;
pub mod logging;
