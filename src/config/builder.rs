//! Workflow builder from YAML configuration.
//!
//! This module converts WorkflowConfig into runnable Workflow instances.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::schedule::Schedule;
use crate::core::strategy::{SchedulingStrategy, SerialStrategy, TrivialStrategy};
use crate::core::time::ScheduledTime;
use crate::core::trigger::Trigger;
use crate::core::workflow::{Workflow, WorkflowConfiguration, WorkflowDefaults};
use crate::external::{CommandExternalService, ExternalService};

use super::error::ConfigError;
use super::types::{ExternalServiceConfig, StrategyConfig, TriggerConfig, WorkflowConfig};
use super::yaml::YamlLoader;

/// Builder for creating Workflows from YAML configuration.
pub struct WorkflowConfigBuilder;

impl WorkflowConfigBuilder {
    /// Build a Workflow from a WorkflowConfig, filling unset policy values
    /// from `defaults`.
    pub fn build(
        config: WorkflowConfig,
        defaults: &WorkflowDefaults,
    ) -> Result<Workflow, ConfigError> {
        let tz = config.schedule.timezone().unwrap_or("UTC");
        let schedule = Schedule::with_timezone(config.schedule.cron(), tz).map_err(|e| {
            ConfigError::invalid_workflow(&config.id, format!("invalid schedule: {}", e))
        })?;

        let mut builder = Workflow::builder(config.id.as_str())
            .defaults(*defaults)
            .schedule(schedule)
            .strategy(Self::build_strategy(&config.id, &config.scheduling_strategy)?)
            .trigger(Self::build_trigger(&config.trigger))
            .external_service(Self::build_external_service(&config.external_service))
            .info(config.info);

        if let Some(count) = config.max_retry_count {
            let count = u32::try_from(count).map_err(|_| {
                ConfigError::invalid_workflow(
                    &config.id,
                    format!("max_retry_count out of range: {}", count),
                )
            })?;
            builder = builder.max_retry_count(count);
        }

        if let Some(start) = &config.start_time {
            let start: ScheduledTime = start.parse().map_err(|e| {
                ConfigError::invalid_workflow(&config.id, format!("start_time: {}", e))
            })?;
            builder = builder.start_time(start);
        }

        if let Some(secs) = config.wait_timeout_secs {
            builder = builder.wait_timeout_secs(secs);
        }

        Ok(builder.build()?)
    }

    fn build_strategy(
        workflow_id: &str,
        config: &StrategyConfig,
    ) -> Result<Arc<dyn SchedulingStrategy>, ConfigError> {
        match config {
            StrategyConfig::Trivial => Ok(Arc::new(TrivialStrategy)),
            StrategyConfig::Serial { concurrency } => SerialStrategy::new(*concurrency)
                .map(|s| Arc::new(s) as Arc<dyn SchedulingStrategy>)
                .ok_or_else(|| {
                    ConfigError::invalid_workflow(workflow_id, "serial concurrency must be at least 1")
                }),
        }
    }

    /// Convert a TriggerConfig tree into a Trigger tree.
    pub fn build_trigger(config: &TriggerConfig) -> Trigger {
        match config {
            TriggerConfig::Always => Trigger::Always,
            TriggerConfig::Never => Trigger::Never,
            TriggerConfig::And { triggers } => {
                Trigger::and(triggers.iter().map(Self::build_trigger))
            }
            TriggerConfig::Or { triggers } => Trigger::or(triggers.iter().map(Self::build_trigger)),
            TriggerConfig::Not { trigger } => Trigger::not(Self::build_trigger(trigger)),
            TriggerConfig::Offset { seconds, trigger } => {
                Trigger::offset(*seconds, Self::build_trigger(trigger))
            }
            TriggerConfig::Delay { seconds } => Trigger::delay(*seconds),
            TriggerConfig::Success { workflow } => Trigger::success(workflow.as_str()),
            TriggerConfig::DataExists { path, store } => {
                Trigger::data_exists(path.as_str(), store.as_str())
            }
        }
    }

    fn build_external_service(config: &ExternalServiceConfig) -> Arc<dyn ExternalService> {
        match config {
            ExternalServiceConfig::Command {
                program,
                args,
                env,
                working_dir,
                timeout_secs,
            } => {
                let mut builder = CommandExternalService::builder(program).args(args);

                for (key, value) in env {
                    builder = builder.env(key, value);
                }

                if let Some(dir) = working_dir {
                    builder = builder.working_dir(dir);
                }

                if let Some(secs) = timeout_secs {
                    builder = builder.timeout(Duration::from_secs(*secs));
                }

                Arc::new(builder.build())
            }
        }
    }
}

/// Load all workflow configurations from a directory.
///
/// Files are read in name order. Only `.yaml` and `.yml` files are considered.
pub fn load_workflows_from_directory(
    dir: impl AsRef<Path>,
    defaults: &WorkflowDefaults,
) -> Result<WorkflowConfiguration, ConfigError> {
    let dir = dir.as_ref();

    if !dir.is_dir() {
        return Err(ConfigError::NotADirectory(dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ConfigError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut configuration = WorkflowConfiguration::new();
    for path in paths {
        let config = YamlLoader::load_workflow_config(&path)?;
        let workflow = WorkflowConfigBuilder::build(config, defaults)?;
        tracing::debug!(workflow_id = %workflow.id(), path = %path.display(), "Loaded workflow");
        configuration.add_workflow(workflow)?;
    }

    Ok(configuration)
}
