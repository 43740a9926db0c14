//! SQLite persistence tests.
//!
//! Tests that verify slot states and rerun marks survive a scheduler restart.

use crate::common::{statuses, t};
use hourglass::testing::MockExternalService;
use hourglass::{
    ExternalStatus, Schedule, Scheduler, SchedulerConfig, SlotId, SlotStatus,
    SqliteStateDatabase, StateDatabase, Trigger, Workflow, WorkflowConfiguration, WorkflowId,
};
use std::sync::Arc;

fn configuration(service: Arc<MockExternalService>) -> WorkflowConfiguration {
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(service)
        .start_time(t("2013-11-27T14:00Z"))
        .build()
        .unwrap();
    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();
    configuration
}

/// Test: A restarted scheduler picks up running slots where the previous
/// process left them.
#[tokio::test]
async fn test_running_slots_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hourglass.db");
    let now = t("2013-11-27T15:01Z");

    let service = Arc::new(MockExternalService::new());
    {
        let storage = Arc::new(SqliteStateDatabase::new(&path).await.unwrap());
        let scheduler = Scheduler::new(
            configuration(service.clone()),
            Arc::clone(&storage),
            SchedulerConfig::new(24),
        )
        .unwrap();
        assert!(scheduler.step(now, None).await.is_success());
        storage.close().await;
    }

    service.set_status(ExternalStatus::Success);
    let storage = Arc::new(SqliteStateDatabase::new(&path).await.unwrap());
    assert_eq!(
        statuses(storage.as_ref(), "wordcount", "2013-11-27T00:00Z", "2013-11-28T00:00Z").await,
        vec![SlotStatus::Running; 2]
    );

    let scheduler = Scheduler::new(
        configuration(service.clone()),
        Arc::clone(&storage),
        SchedulerConfig::new(24),
    )
    .unwrap();
    assert!(scheduler.step(now, None).await.is_success());
    assert_eq!(
        statuses(storage.as_ref(), "wordcount", "2013-11-27T00:00Z", "2013-11-28T00:00Z").await,
        vec![SlotStatus::Success; 2]
    );
    // No slot was submitted twice.
    assert_eq!(service.submitted().len(), 2);
}

/// Test: Rerun marks are persisted alongside slot states.
#[tokio::test]
async fn test_rerun_marks_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hourglass.db");
    let slot = SlotId::new("wordcount", t("2013-11-27T14:00Z"));

    {
        let storage = SqliteStateDatabase::new(&path).await.unwrap();
        storage
            .mark_slot_for_rerun(&slot, t("2013-11-27T16:00Z"))
            .await
            .unwrap();
        storage.close().await;
    }

    let storage = SqliteStateDatabase::new(&path).await.unwrap();
    let marked = storage
        .get_times_marked_for_rerun(&WorkflowId::new("wordcount"), t("2013-11-27T18:00Z"))
        .await
        .unwrap();
    assert!(marked.contains(&t("2013-11-27T14:00Z")));

    let state = storage.get_slot_state(&slot).await.unwrap().unwrap();
    assert_eq!(state.status(), SlotStatus::Waiting);
}
