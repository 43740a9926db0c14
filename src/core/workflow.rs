//! Workflow definitions and the workflow registry.
//!
//! A [`Workflow`] bundles everything the scheduler needs to drive one
//! recurring job: when it runs (schedule), when its input is available
//! (trigger), how many instances may run at once (strategy), where it runs
//! (external service) and its retry and timeout policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::schedule::Schedule;
use super::strategy::{SchedulingStrategy, TrivialStrategy};
use super::time::ScheduledTime;
use super::trigger::Trigger;
use super::types::WorkflowId;
use crate::external::ExternalService;

/// Errors that can occur when building workflows or registering them.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A required part was not provided to the builder.
    #[error("workflow '{workflow_id}' is missing its {part}")]
    MissingPart {
        workflow_id: WorkflowId,
        part: &'static str,
    },

    /// The identifier is empty.
    #[error("workflow id cannot be empty")]
    EmptyId,

    /// The wait timeout is negative.
    #[error("workflow '{0}' has a negative wait timeout")]
    NegativeWaitTimeout(WorkflowId),

    /// A workflow with the same id is already registered.
    #[error("duplicate workflow id: {0}")]
    DuplicateId(WorkflowId),
}

/// Default policy values applied when a workflow does not set its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowDefaults {
    /// Slots before this instant are never considered.
    pub start_time: ScheduledTime,
    /// Seconds a slot may wait for its trigger.
    pub wait_timeout_secs: i64,
    /// Retries after the first failed attempt.
    pub max_retry_count: u32,
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            start_time: ScheduledTime::epoch(),
            wait_timeout_secs: i64::from(i32::MAX),
            max_retry_count: 0,
        }
    }
}

/// A person to contact about a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Descriptive metadata. Has no effect on scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<Contact>,
}

/// A scheduled workflow.
#[derive(Clone)]
pub struct Workflow {
    id: WorkflowId,
    schedule: Schedule,
    strategy: Arc<dyn SchedulingStrategy>,
    trigger: Trigger,
    external_service: Arc<dyn ExternalService>,
    max_retry_count: u32,
    start_time: ScheduledTime,
    wait_timeout_secs: i64,
    info: WorkflowInfo,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("schedule", &self.schedule.expression())
            .field("strategy", &self.strategy)
            .field("trigger", &self.trigger)
            .field("max_retry_count", &self.max_retry_count)
            .field("start_time", &self.start_time)
            .field("wait_timeout_secs", &self.wait_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Start building a workflow with the given id.
    pub fn builder(id: impl Into<WorkflowId>) -> WorkflowBuilder {
        WorkflowBuilder::new(id)
    }

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn strategy(&self) -> &dyn SchedulingStrategy {
        self.strategy.as_ref()
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn external_service(&self) -> &dyn ExternalService {
        self.external_service.as_ref()
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    pub fn start_time(&self) -> ScheduledTime {
        self.start_time
    }

    pub fn wait_timeout_secs(&self) -> i64 {
        self.wait_timeout_secs
    }

    pub fn info(&self) -> &WorkflowInfo {
        &self.info
    }
}

/// Builder for [`Workflow`].
///
/// Schedule, trigger and external service are required. The strategy
/// defaults to [`TrivialStrategy`] and the policy values come from
/// [`WorkflowDefaults`].
pub struct WorkflowBuilder {
    id: WorkflowId,
    schedule: Option<Schedule>,
    strategy: Arc<dyn SchedulingStrategy>,
    trigger: Option<Trigger>,
    external_service: Option<Arc<dyn ExternalService>>,
    max_retry_count: Option<u32>,
    start_time: Option<ScheduledTime>,
    wait_timeout_secs: Option<i64>,
    info: WorkflowInfo,
    defaults: WorkflowDefaults,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            schedule: None,
            strategy: Arc::new(TrivialStrategy),
            trigger: None,
            external_service: None,
            max_retry_count: None,
            start_time: None,
            wait_timeout_secs: None,
            info: WorkflowInfo::default(),
            defaults: WorkflowDefaults::default(),
        }
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn SchedulingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn external_service(mut self, service: Arc<dyn ExternalService>) -> Self {
        self.external_service = Some(service);
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = Some(count);
        self
    }

    pub fn start_time(mut self, start_time: ScheduledTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn wait_timeout_secs(mut self, secs: i64) -> Self {
        self.wait_timeout_secs = Some(secs);
        self
    }

    pub fn info(mut self, info: WorkflowInfo) -> Self {
        self.info = info;
        self
    }

    /// Use these defaults for any policy value not set explicitly.
    pub fn defaults(mut self, defaults: WorkflowDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build the workflow.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.id.as_str().is_empty() {
            return Err(WorkflowError::EmptyId);
        }
        let missing = |part| WorkflowError::MissingPart {
            workflow_id: self.id.clone(),
            part,
        };
        let schedule = self.schedule.clone().ok_or_else(|| missing("schedule"))?;
        let trigger = self.trigger.clone().ok_or_else(|| missing("trigger"))?;
        let external_service = self
            .external_service
            .clone()
            .ok_or_else(|| missing("external service"))?;

        let wait_timeout_secs = self
            .wait_timeout_secs
            .unwrap_or(self.defaults.wait_timeout_secs);
        if wait_timeout_secs < 0 {
            return Err(WorkflowError::NegativeWaitTimeout(self.id));
        }

        Ok(Workflow {
            id: self.id,
            schedule,
            strategy: self.strategy,
            trigger,
            external_service,
            max_retry_count: self
                .max_retry_count
                .unwrap_or(self.defaults.max_retry_count),
            start_time: self.start_time.unwrap_or(self.defaults.start_time),
            wait_timeout_secs,
            info: self.info,
        })
    }
}

/// Registry of workflows keyed by id, iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfiguration {
    workflows: BTreeMap<WorkflowId, Arc<Workflow>>,
}

impl WorkflowConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow. Fails if the id is already taken.
    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<(), WorkflowError> {
        if self.workflows.contains_key(workflow.id()) {
            return Err(WorkflowError::DuplicateId(workflow.id().clone()));
        }
        self.workflows
            .insert(workflow.id().clone(), Arc::new(workflow));
        Ok(())
    }

    pub fn find_workflow(&self, id: &WorkflowId) -> Option<&Arc<Workflow>> {
        self.workflows.get(id)
    }

    pub fn workflows(&self) -> impl Iterator<Item = &Arc<Workflow>> {
        self.workflows.values()
    }

    pub fn workflow_ids(&self) -> impl Iterator<Item = &WorkflowId> {
        self.workflows.keys()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategy::SerialStrategy;
    use crate::testing::MockExternalService;

    fn base(id: &str) -> WorkflowBuilder {
        Workflow::builder(id)
            .schedule(Schedule::hourly())
            .trigger(Trigger::Always)
            .external_service(Arc::new(MockExternalService::new()))
    }

    #[test]
    fn test_build_applies_defaults() {
        let workflow = base("wordcount").build().unwrap();
        assert_eq!(workflow.id().as_str(), "wordcount");
        assert_eq!(workflow.max_retry_count(), 0);
        assert_eq!(workflow.start_time(), ScheduledTime::epoch());
        assert_eq!(workflow.wait_timeout_secs(), i64::from(i32::MAX));
        assert!(workflow.info().contacts.is_empty());
    }

    #[test]
    fn test_build_with_explicit_policy() {
        let start: ScheduledTime = "2013-11-20T00:00Z".parse().unwrap();
        let workflow = base("wordcount")
            .strategy(Arc::new(SerialStrategy::new(1).unwrap()))
            .max_retry_count(3)
            .start_time(start)
            .wait_timeout_secs(3600)
            .build()
            .unwrap();
        assert_eq!(workflow.max_retry_count(), 3);
        assert_eq!(workflow.start_time(), start);
        assert_eq!(workflow.wait_timeout_secs(), 3600);
    }

    #[test]
    fn test_custom_defaults() {
        let defaults = WorkflowDefaults {
            max_retry_count: 5,
            ..WorkflowDefaults::default()
        };
        let workflow = base("wf").defaults(defaults).build().unwrap();
        assert_eq!(workflow.max_retry_count(), 5);

        let overridden = base("wf").defaults(defaults).max_retry_count(1).build().unwrap();
        assert_eq!(overridden.max_retry_count(), 1);
    }

    #[test]
    fn test_missing_parts_are_rejected() {
        let result = Workflow::builder("wf")
            .trigger(Trigger::Always)
            .external_service(Arc::new(MockExternalService::new()))
            .build();
        assert!(matches!(
            result,
            Err(WorkflowError::MissingPart {
                part: "schedule",
                ..
            })
        ));

        let result = Workflow::builder("wf")
            .schedule(Schedule::hourly())
            .trigger(Trigger::Always)
            .build();
        assert!(matches!(
            result,
            Err(WorkflowError::MissingPart {
                part: "external service",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_id_and_negative_timeout() {
        assert!(matches!(base("").build(), Err(WorkflowError::EmptyId)));
        assert!(matches!(
            base("wf").wait_timeout_secs(-1).build(),
            Err(WorkflowError::NegativeWaitTimeout(_))
        ));
    }

    #[test]
    fn test_configuration_rejects_duplicates() {
        let mut config = WorkflowConfiguration::new();
        config.add_workflow(base("b").build().unwrap()).unwrap();
        config.add_workflow(base("a").build().unwrap()).unwrap();

        let result = config.add_workflow(base("a").build().unwrap());
        assert!(matches!(result, Err(WorkflowError::DuplicateId(_))));
        assert_eq!(config.len(), 2);

        let ids: Vec<&str> = config.workflow_ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(config.find_workflow(&WorkflowId::new("a")).is_some());
        assert!(config.find_workflow(&WorkflowId::new("c")).is_none());
    }
}
