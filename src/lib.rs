//! hourglass - a time-sliced workflow scheduler.
//!
//! Every workflow produces *slots*, one per instant of its schedule. The
//! [`Scheduler`] repeatedly reconciles the slots of a sliding window: it
//! waits for each slot's [`Trigger`] to become ready, lets the workflow's
//! [`SchedulingStrategy`] pick what to start, hands the slot to an
//! [`ExternalService`], and polls it until it succeeds or runs out of retries.
//! Every transition is persisted through a [`StateDatabase`].
//!
//! ```no_run
//! use hourglass::{
//!     InMemoryStateDatabase, Schedule, Scheduler, SchedulerConfig, ScheduledTime, Trigger,
//!     Workflow, WorkflowConfiguration,
//! };
//! use hourglass::testing::MockExternalService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let workflow = Workflow::builder("wordcount")
//!     .schedule(Schedule::hourly())
//!     .trigger(Trigger::delay(600))
//!     .external_service(Arc::new(MockExternalService::new()))
//!     .max_retry_count(2)
//!     .build()?;
//!
//! let mut configuration = WorkflowConfiguration::new();
//! configuration.add_workflow(workflow)?;
//!
//! let storage = Arc::new(InMemoryStateDatabase::new());
//! let scheduler = Scheduler::new(configuration, storage, SchedulerConfig::new(24))?;
//! let report = scheduler.step(ScheduledTime::now(), None).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod external;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{
    ConfigError, GlobalConfig, WorkflowConfig, WorkflowConfigBuilder, YamlLoader,
    load_workflows_from_directory,
};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::slot::{SlotError, SlotState, SlotStatus};
pub use core::store::{DataStore, DataStoreError, DataStores, LocalFileStore};
pub use core::strategy::{SchedulingStrategy, SerialStrategy, TrivialStrategy};
pub use core::time::{MAX_SHIFT_SECS, ScheduledTime, TimeOutOfRange};
pub use core::trigger::{Trigger, TriggerContext, TriggerError, TriggerStatus};
pub use core::types::{ExternalId, SlotId, WorkflowId};
pub use core::workflow::{
    Workflow, WorkflowBuilder, WorkflowConfiguration, WorkflowDefaults, WorkflowError,
};
pub use events::{Event, EventBus, EventHandler};
pub use external::{
    CommandExternalService, ExternalService, ExternalServiceError, ExternalStatus,
};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle, SchedulerState, StepReport,
    WorkflowFailure,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStateDatabase;
pub use storage::{InMemoryStateDatabase, StateDatabase, StorageError};
