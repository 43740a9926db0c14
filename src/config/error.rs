//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::workflow::WorkflowError;

/// Errors raised while loading the global configuration or workflow files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The workflow directory could not be listed.
    #[error("failed to list workflow directory '{path}': {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The workflow location is not a directory.
    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),

    /// YAML that does not match the configuration schema.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Same as [`ConfigError::Yaml`], for a file on disk.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A global setting is out of range.
    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    /// A workflow definition is inconsistent.
    #[error("workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    /// A trigger tree cannot be evaluated as written.
    #[error("workflow '{workflow}': invalid trigger: {reason}")]
    InvalidTrigger { workflow: String, reason: String },

    /// A required value is missing or blank.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The loaded workflows do not form a valid configuration.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl ConfigError {
    pub(crate) fn invalid_workflow(workflow: &str, reason: impl Into<String>) -> Self {
        Self::InvalidWorkflow {
            workflow: workflow.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_trigger(workflow: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTrigger {
            workflow: workflow.to_string(),
            reason: reason.into(),
        }
    }
}
