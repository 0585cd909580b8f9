//! Shared utilities for the mongo-init components
//!
//! This crate provides the ambient plumbing used by the provisioning binary:
//! - Structured logging initialization
//! - Environment variable parsing helpers
//! - Command execution utilities
//! - Telemetry for reporting lifecycle events

pub mod command;
pub mod config;
pub mod logging;
pub mod telemetry;

pub use command::{run, run_checked, CommandOutput};
pub use config::{ConfigExt, ContainerEnv};
pub use logging::init_logging;
pub use telemetry::{Telemetry, TelemetryEvent};
