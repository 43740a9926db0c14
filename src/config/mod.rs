//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for workflows and global settings.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{WorkflowConfigBuilder, load_workflows_from_directory};
pub use error::ConfigError;
pub use types::{
    ApiConfig, ExternalServiceConfig, GlobalConfig, ScheduleConfig, StorageConfig,
    StrategyConfig, TriggerConfig, WorkflowConfig,
};
pub use yaml::{MAX_TRIGGER_DEPTH, YamlLoader};
