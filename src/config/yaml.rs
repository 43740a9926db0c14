//! YAML configuration parsing.
//!
//! Parses workflow definitions and global configuration from YAML files.

use std::path::Path;

use crate::core::time::{MAX_SHIFT_SECS, ScheduledTime};
use crate::scheduler::SchedulerConfig;

use super::error::ConfigError;
use super::types::{
    ExternalServiceConfig, GlobalConfig, StorageConfig, StrategyConfig, TriggerConfig,
    WorkflowConfig,
};

/// Deepest trigger nesting accepted from configuration.
pub const MAX_TRIGGER_DEPTH: usize = 32;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse_global_config(&content)
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    fn validate_global_config(config: &GlobalConfig) -> Result<(), ConfigError> {
        if config.sliding_window_hours == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "sliding_window_hours",
                reason: "must be at least 1".into(),
            });
        }

        if config.sliding_window_hours > SchedulerConfig::MAX_SLIDING_WINDOW_HOURS {
            return Err(ConfigError::InvalidSetting {
                field: "sliding_window_hours",
                reason: format!(
                    "must be at most {}",
                    SchedulerConfig::MAX_SLIDING_WINDOW_HOURS
                ),
            });
        }

        if config.step_interval_secs == Some(0) {
            return Err(ConfigError::InvalidSetting {
                field: "step_interval_secs",
                reason: "cannot be zero".into(),
            });
        }

        if let StorageConfig::Sqlite { path } = &config.storage
            && path.trim().is_empty()
        {
            return Err(ConfigError::MissingField("storage.path".into()));
        }

        if config.defaults.wait_timeout_secs < 0 {
            return Err(ConfigError::InvalidSetting {
                field: "defaults.wait_timeout_secs",
                reason: "cannot be negative".into(),
            });
        }

        Ok(())
    }

    /// Load a workflow configuration from a file.
    pub fn load_workflow_config(path: impl AsRef<Path>) -> Result<WorkflowConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let config: WorkflowConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_workflow_config(&config)?;
        Ok(config)
    }

    /// Parse a workflow configuration from a YAML string.
    pub fn parse_workflow_config(yaml: &str) -> Result<WorkflowConfig, ConfigError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        Self::validate_workflow_config(&config)?;
        Ok(config)
    }

    /// Validate a workflow configuration.
    fn validate_workflow_config(config: &WorkflowConfig) -> Result<(), ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }

        if config.schedule.cron().trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "{}: schedule",
                config.id
            )));
        }

        if let Some(count) = config.max_retry_count
            && (count < 0 || count > i64::from(u32::MAX))
        {
            return Err(ConfigError::invalid_workflow(
                &config.id,
                format!(
                    "max_retry_count must be between 0 and {}, got {}",
                    u32::MAX,
                    count
                ),
            ));
        }

        if let Some(secs) = config.wait_timeout_secs
            && secs < 0
        {
            return Err(ConfigError::invalid_workflow(
                &config.id,
                "wait_timeout_secs cannot be negative",
            ));
        }

        if let Some(start) = &config.start_time {
            start.parse::<ScheduledTime>().map_err(|e| {
                ConfigError::invalid_workflow(&config.id, format!("start_time: {}", e))
            })?;
        }

        if let StrategyConfig::Serial { concurrency: 0 } = config.scheduling_strategy {
            return Err(ConfigError::invalid_workflow(
                &config.id,
                "serial concurrency must be at least 1",
            ));
        }

        match &config.external_service {
            ExternalServiceConfig::Command {
                program,
                timeout_secs,
                ..
            } => {
                if program.trim().is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "{}: external_service.program",
                        config.id
                    )));
                }
                if *timeout_secs == Some(0) {
                    return Err(ConfigError::invalid_workflow(
                        &config.id,
                        "external_service.timeout_secs cannot be zero",
                    ));
                }
            }
        }

        Self::validate_trigger(&config.id, &config.trigger, 1)
    }

    /// Validate a trigger tree recursively.
    fn validate_trigger(
        workflow_id: &str,
        trigger: &TriggerConfig,
        depth: usize,
    ) -> Result<(), ConfigError> {
        if depth > MAX_TRIGGER_DEPTH {
            return Err(ConfigError::invalid_trigger(
                workflow_id,
                format!("nesting deeper than {}", MAX_TRIGGER_DEPTH),
            ));
        }

        match trigger {
            TriggerConfig::Always | TriggerConfig::Never => Ok(()),
            TriggerConfig::And { triggers } | TriggerConfig::Or { triggers } => {
                for child in triggers {
                    Self::validate_trigger(workflow_id, child, depth + 1)?;
                }
                Ok(())
            }
            TriggerConfig::Offset { seconds, .. }
                if seconds.unsigned_abs() > MAX_SHIFT_SECS.unsigned_abs() =>
            {
                Err(ConfigError::invalid_trigger(
                    workflow_id,
                    format!("offset of {} seconds exceeds {}", seconds, MAX_SHIFT_SECS),
                ))
            }
            TriggerConfig::Not { trigger } | TriggerConfig::Offset { trigger, .. } => {
                Self::validate_trigger(workflow_id, trigger, depth + 1)
            }
            TriggerConfig::Delay { seconds } if *seconds < 0 => Err(
                ConfigError::invalid_trigger(workflow_id, "delay cannot be negative"),
            ),
            TriggerConfig::Delay { seconds } if *seconds > MAX_SHIFT_SECS => {
                Err(ConfigError::invalid_trigger(
                    workflow_id,
                    format!("delay of {} seconds exceeds {}", seconds, MAX_SHIFT_SECS),
                ))
            }
            TriggerConfig::Delay { .. } => Ok(()),
            TriggerConfig::Success { workflow } if workflow.trim().is_empty() => Err(
                ConfigError::invalid_trigger(workflow_id, "success trigger needs a workflow"),
            ),
            TriggerConfig::Success { .. } => Ok(()),
            TriggerConfig::DataExists { path, store } => {
                if path.trim().is_empty() {
                    return Err(ConfigError::invalid_trigger(
                        workflow_id,
                        "data_exists trigger needs a path",
                    ));
                }
                if store.trim().is_empty() {
                    return Err(ConfigError::invalid_trigger(
                        workflow_id,
                        "data_exists trigger needs a store",
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ScheduleConfig;

    #[test]
    fn test_parse_minimal_workflow_yaml() {
        let yaml = r#"
id: wordcount
schedule: "@hourly"
trigger:
  type: always
external_service:
  type: command
  program: "true"
"#;
        let config = YamlLoader::parse_workflow_config(yaml).unwrap();
        assert_eq!(config.id, "wordcount");
        assert_eq!(config.schedule, ScheduleConfig::Simple("@hourly".into()));
        assert_eq!(config.scheduling_strategy, StrategyConfig::Trivial);
        assert_eq!(config.trigger, TriggerConfig::Always);
        assert!(config.max_retry_count.is_none());
        assert!(config.info.contacts.is_empty());
    }

    #[test]
    fn test_parse_workflow_with_all_fields() {
        let yaml = r#"
id: wordcount
schedule:
  cron: "0 0 * * * *"
  timezone: Europe/Berlin
scheduling_strategy:
  type: serial
  concurrency: 2
trigger:
  type: and
  triggers:
    - type: delay
      seconds: 600
    - type: success
      workflow: ingest
    - type: offset
      seconds: -3600
      trigger:
        type: data_exists
        path: /logs/${year}/${month}/${day}/${hour}/_READY
    - type: not
      trigger:
        type: never
external_service:
  type: command
  program: ./wordcount.sh
  args: ["--hour", "${hour}"]
  env:
    LOG_LEVEL: debug
  working_dir: /opt/jobs
  timeout_secs: 3600
max_retry_count: 3
start_time: "2013-11-01T00:00Z"
wait_timeout_secs: 86400
info:
  url: https://example.com/wordcount
  contacts:
    - name: Data Team
      email: data@example.com
"#;
        let config = YamlLoader::parse_workflow_config(yaml).unwrap();
        assert_eq!(config.schedule.timezone(), Some("Europe/Berlin"));
        assert_eq!(
            config.scheduling_strategy,
            StrategyConfig::Serial { concurrency: 2 }
        );
        assert_eq!(config.max_retry_count, Some(3));
        assert_eq!(config.wait_timeout_secs, Some(86400));
        assert_eq!(config.info.contacts.len(), 1);

        let TriggerConfig::And { triggers } = &config.trigger else {
            panic!("expected and trigger");
        };
        assert_eq!(triggers.len(), 4);
        match &triggers[2] {
            TriggerConfig::Offset { seconds, trigger } => {
                assert_eq!(*seconds, -3600);
                assert!(matches!(
                    trigger.as_ref(),
                    TriggerConfig::DataExists { store, .. } if store == "file:///"
                ));
            }
            other => panic!("unexpected trigger {:?}", other),
        }

        let ExternalServiceConfig::Command { args, env, .. } = &config.external_service;
        assert_eq!(args, &vec!["--hour".to_string(), "${hour}".to_string()]);
        assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
    }

    #[test]
    fn test_unknown_trigger_type_rejected() {
        let yaml = r#"
id: wf
schedule: "@hourly"
trigger:
  type: eventually
external_service:
  type: command
  program: "true"
"#;
        assert!(matches!(
            YamlLoader::parse_workflow_config(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let yaml = r#"
id: ""
schedule: "@hourly"
trigger:
  type: always
external_service:
  type: command
  program: "true"
"#;
        assert!(matches!(
            YamlLoader::parse_workflow_config(yaml),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_negative_retry_count_rejected() {
        let yaml = r#"
id: wf
schedule: "@hourly"
trigger:
  type: always
external_service:
  type: command
  program: "true"
max_retry_count: -1
"#;
        let err = YamlLoader::parse_workflow_config(yaml).unwrap_err();
        assert!(err.to_string().contains("max_retry_count"));
    }

    #[test]
    fn test_zero_serial_concurrency_rejected() {
        let yaml = r#"
id: wf
schedule: "@hourly"
scheduling_strategy:
  type: serial
  concurrency: 0
trigger:
  type: always
external_service:
  type: command
  program: "true"
"#;
        assert!(matches!(
            YamlLoader::parse_workflow_config(yaml),
            Err(ConfigError::InvalidWorkflow { .. })
        ));
    }

    #[test]
    fn test_invalid_start_time_rejected() {
        let yaml = r#"
id: wf
schedule: "@hourly"
trigger:
  type: always
external_service:
  type: command
  program: "true"
start_time: yesterday
"#;
        let err = YamlLoader::parse_workflow_config(yaml).unwrap_err();
        assert!(err.to_string().contains("start_time"));
    }

    #[test]
    fn test_negative_delay_rejected_inside_tree() {
        let yaml = r#"
id: wf
schedule: "@hourly"
trigger:
  type: or
  triggers:
    - type: never
    - type: not
      trigger:
        type: delay
        seconds: -5
external_service:
  type: command
  program: "true"
"#;
        let err = YamlLoader::parse_workflow_config(yaml).unwrap_err();
        assert!(err.to_string().contains("delay"));
    }

    #[test]
    fn test_out_of_range_offset_and_delay_rejected() {
        for trigger in [
            "  type: offset\n  seconds: 9223372036854775807\n  trigger:\n    type: always",
            "  type: offset\n  seconds: -9223372036854775807\n  trigger:\n    type: always",
            "  type: delay\n  seconds: 9223372036854775807",
        ] {
            let yaml = format!(
                "id: wf\nschedule: \"@hourly\"\ntrigger:\n{}\nexternal_service:\n  type: command\n  program: \"true\"\n",
                trigger
            );
            assert!(
                matches!(
                    YamlLoader::parse_workflow_config(&yaml),
                    Err(ConfigError::InvalidTrigger { .. })
                ),
                "accepted: {trigger}"
            );
        }

        let yaml = "id: wf\nschedule: \"@hourly\"\ntrigger:\n  type: offset\n  seconds: -86400\n  trigger:\n    type: delay\n    seconds: 3600\nexternal_service:\n  type: command\n  program: \"true\"\n";
        assert!(YamlLoader::parse_workflow_config(yaml).is_ok());
    }

    #[test]
    fn test_excessive_trigger_nesting_rejected() {
        let mut trigger = TriggerConfig::Always;
        for _ in 0..MAX_TRIGGER_DEPTH {
            trigger = TriggerConfig::Not {
                trigger: Box::new(trigger),
            };
        }
        let config = WorkflowConfig {
            id: "deep".into(),
            schedule: ScheduleConfig::Simple("@hourly".into()),
            scheduling_strategy: StrategyConfig::Trivial,
            trigger,
            external_service: ExternalServiceConfig::Command {
                program: "true".into(),
                args: vec![],
                env: Default::default(),
                working_dir: None,
                timeout_secs: None,
            },
            max_retry_count: None,
            start_time: None,
            wait_timeout_secs: None,
            info: Default::default(),
        };
        let yaml = serde_yaml::to_string(&config).unwrap();

        assert!(matches!(
            YamlLoader::parse_workflow_config(&yaml),
            Err(ConfigError::InvalidTrigger { .. })
        ));
    }

    #[test]
    fn test_parse_global_config_defaults() {
        let config = YamlLoader::parse_global_config("{}").unwrap();
        assert_eq!(config.sliding_window_hours, 168);
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.api.port, 8565);
        assert_eq!(config.defaults.max_retry_count, 0);
        assert!(config.step_interval_secs.is_none());
    }

    #[test]
    fn test_parse_global_config() {
        let yaml = r#"
sliding_window_hours: 24
step_interval_secs: 60
storage:
  type: sqlite
  path: /var/lib/hourglass/state.db
api:
  host: 0.0.0.0
  port: 9000
defaults:
  max_retry_count: 2
  start_time: "2013-11-01T00:00Z"
"#;
        let config = YamlLoader::parse_global_config(yaml).unwrap();
        assert_eq!(config.sliding_window_hours, 24);
        assert_eq!(config.step_interval_secs, Some(60));
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "/var/lib/hourglass/state.db".into()
            }
        );
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.defaults.max_retry_count, 2);
        assert_eq!(
            config.defaults.start_time,
            "2013-11-01T00:00Z".parse().unwrap()
        );
        assert_eq!(config.defaults.wait_timeout_secs, i64::from(i32::MAX));
        assert_eq!(config.scheduler_config().sliding_window_hours, 24);
    }

    #[test]
    fn test_zero_sliding_window_rejected() {
        assert!(matches!(
            YamlLoader::parse_global_config("sliding_window_hours: 0"),
            Err(ConfigError::InvalidSetting {
                field: "sliding_window_hours",
                ..
            })
        ));
    }

    #[test]
    fn test_huge_sliding_window_rejected() {
        let yaml = format!("sliding_window_hours: {}", u32::MAX);
        assert!(matches!(
            YamlLoader::parse_global_config(&yaml),
            Err(ConfigError::InvalidSetting {
                field: "sliding_window_hours",
                ..
            })
        ));
    }

    #[test]
    fn test_load_workflow_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "id: [unterminated").unwrap();

        match YamlLoader::load_workflow_config(&path) {
            Err(ConfigError::YamlFile { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected YamlFile, got {:?}", other),
        }
    }
}
