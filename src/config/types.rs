//! Configuration type definitions.
//!
//! This module contains the type definitions for YAML configuration structures:
//! the global scheduler settings and one workflow definition per file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::workflow::{WorkflowDefaults, WorkflowInfo};
use crate::scheduler::SchedulerConfig;

/// Global configuration (hourglass.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Hours each step looks back from `now`.
    pub sliding_window_hours: u32,
    /// Seconds between automatic steps. No automatic steps when absent.
    pub step_interval_secs: Option<u64>,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// HTTP server settings.
    pub api: ApiConfig,
    /// Policy values for workflows that do not set their own.
    pub defaults: WorkflowDefaults,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            sliding_window_hours: SchedulerConfig::DEFAULT_SLIDING_WINDOW_HOURS,
            step_interval_secs: None,
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
            defaults: WorkflowDefaults::default(),
        }
    }
}

impl GlobalConfig {
    /// Scheduler settings derived from this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.sliding_window_hours)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

/// Workflow configuration from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow identifier.
    pub id: String,
    /// Schedule expression (cron or shortcut).
    pub schedule: ScheduleConfig,
    /// Admission control for READY slots.
    #[serde(default)]
    pub scheduling_strategy: StrategyConfig,
    /// Readiness condition for each slot.
    pub trigger: TriggerConfig,
    /// Where slots run.
    pub external_service: ExternalServiceConfig,
    /// Retries after the first failed attempt.
    pub max_retry_count: Option<i64>,
    /// Slots before this instant are never considered.
    pub start_time: Option<String>,
    /// Seconds a slot may wait for its trigger before giving up.
    pub wait_timeout_secs: Option<i64>,
    /// Descriptive metadata.
    #[serde(default)]
    pub info: WorkflowInfo,
}

/// Schedule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleConfig {
    /// Simple cron expression string.
    Simple(String),
    /// Detailed schedule with timezone.
    Detailed {
        /// Cron expression or shortcut.
        cron: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
    },
}

impl ScheduleConfig {
    /// Get the cron expression.
    pub fn cron(&self) -> &str {
        match self {
            ScheduleConfig::Simple(s) => s,
            ScheduleConfig::Detailed { cron, .. } => cron,
        }
    }

    /// Get the timezone, if specified.
    pub fn timezone(&self) -> Option<&str> {
        match self {
            ScheduleConfig::Simple(_) => None,
            ScheduleConfig::Detailed { timezone, .. } => timezone.as_deref(),
        }
    }
}

/// Scheduling strategy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Start every READY slot.
    #[default]
    Trivial,
    /// Keep at most `concurrency` slots running, oldest first.
    Serial { concurrency: usize },
}

/// Trigger tree configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    Always,
    Never,
    And { triggers: Vec<TriggerConfig> },
    Or { triggers: Vec<TriggerConfig> },
    Not { trigger: Box<TriggerConfig> },
    /// Evaluate `trigger` as if the slot were `seconds` later.
    Offset {
        seconds: i64,
        trigger: Box<TriggerConfig>,
    },
    /// Ready once `seconds` have passed since the scheduled time.
    Delay { seconds: i64 },
    /// Ready once the same slot of `workflow` succeeded.
    Success { workflow: String },
    /// Ready once `path` exists in `store`.
    DataExists {
        path: String,
        #[serde(default = "default_store")]
        store: String,
    },
}

fn default_store() -> String {
    "file:///".to_string()
}

/// External service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalServiceConfig {
    /// Run each slot as a local process.
    Command {
        /// The program to run.
        program: String,
        /// Program arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables for the process.
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory.
        working_dir: Option<String>,
        /// Kill the process after this many seconds.
        timeout_secs: Option<u64>,
    },
}
