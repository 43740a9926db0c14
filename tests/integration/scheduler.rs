//! End-to-end scheduler tests.
//!
//! Tests that verify the full pipeline from workflow definition to finished
//! slots, driven by explicit steps and by the periodic loop.

use crate::common::{statuses, t, wait_for_slot_status, write_workflow};
use hourglass::testing::{MockExternalService, RecordingHandler};
use hourglass::{
    Event, EventBus, ExternalStatus, InMemoryStateDatabase, Schedule, ScheduledTime, Scheduler,
    SchedulerConfig, SerialStrategy, SlotId, SlotStatus, StateDatabase, Trigger, Workflow,
    WorkflowConfiguration, WorkflowDefaults, load_workflows_from_directory,
};
use std::sync::Arc;
use std::time::Duration;

fn yaml(id: &str, trigger: &str) -> String {
    format!(
        r#"
id: {id}
schedule: "@hourly"
start_time: "2013-11-27T12:00Z"
trigger:
{trigger}
external_service:
  type: command
  program: "true"
"#
    )
}

/// Test: Workflows loaded from YAML run real commands to completion, and a
/// dependent workflow waits for its upstream slots.
#[tokio::test]
async fn test_yaml_workflows_run_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    write_workflow(dir.path(), "ingest", &yaml("ingest", "  type: always"));
    write_workflow(
        dir.path(),
        "report",
        &yaml("report", "  type: success\n  workflow: ingest"),
    );

    let configuration =
        load_workflows_from_directory(dir.path(), &WorkflowDefaults::default()).unwrap();
    assert_eq!(configuration.len(), 2);

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler =
        Scheduler::new(configuration, Arc::clone(&storage), SchedulerConfig::new(24)).unwrap();
    let now = t("2013-11-27T15:01Z");

    let report = scheduler.step(now, None).await;
    assert!(report.is_success(), "failures: {:?}", report.failures);
    assert_eq!(
        statuses(storage.as_ref(), "ingest", "2013-11-27T00:00Z", "2013-11-28T00:00Z").await,
        vec![SlotStatus::Running; 4]
    );
    assert_eq!(
        statuses(storage.as_ref(), "report", "2013-11-27T00:00Z", "2013-11-28T00:00Z").await,
        vec![SlotStatus::Waiting; 4]
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let report = scheduler.step(now, None).await;
        assert!(report.is_success(), "failures: {:?}", report.failures);

        let done = statuses(storage.as_ref(), "report", "2013-11-27T00:00Z", "2013-11-28T00:00Z")
            .await
            .iter()
            .all(|s| *s == SlotStatus::Success);
        if done {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "report slots did not finish"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(
        statuses(storage.as_ref(), "ingest", "2013-11-27T00:00Z", "2013-11-28T00:00Z").await,
        vec![SlotStatus::Success; 4]
    );
}

/// Test: A serial workflow never runs more than one slot at a time and
/// starts the oldest READY slot first.
#[tokio::test]
async fn test_serial_workflow_runs_oldest_first() {
    let service = Arc::new(MockExternalService::new());
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .strategy(Arc::new(SerialStrategy::new(1).unwrap()))
        .trigger(Trigger::Always)
        .external_service(service.clone())
        .start_time(t("2013-11-27T12:00Z"))
        .build()
        .unwrap();
    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler =
        Scheduler::new(configuration, Arc::clone(&storage), SchedulerConfig::new(24)).unwrap();
    let now = t("2013-11-27T15:01Z");
    let range = ("2013-11-27T00:00Z", "2013-11-28T00:00Z");

    scheduler.step(now, None).await;
    assert_eq!(
        statuses(storage.as_ref(), "wordcount", range.0, range.1).await,
        vec![
            SlotStatus::Running,
            SlotStatus::Ready,
            SlotStatus::Ready,
            SlotStatus::Ready
        ]
    );
    assert_eq!(
        service.submitted(),
        vec![SlotId::new("wordcount", t("2013-11-27T12:00Z"))]
    );

    // Nothing changes while the job is still running.
    scheduler.step(now, None).await;
    assert_eq!(service.submitted().len(), 1);

    service.set_status(ExternalStatus::Success);
    scheduler.step(now, None).await;
    assert_eq!(
        statuses(storage.as_ref(), "wordcount", range.0, range.1).await,
        vec![
            SlotStatus::Success,
            SlotStatus::Running,
            SlotStatus::Ready,
            SlotStatus::Ready
        ]
    );
    assert_eq!(
        service.submitted()[1],
        SlotId::new("wordcount", t("2013-11-27T13:00Z"))
    );
}

/// Test: A slot marked for rerun runs again on the next step, even after it
/// has left the sliding window.
#[tokio::test]
async fn test_rerun_outside_window() {
    let service = Arc::new(MockExternalService::with_status(ExternalStatus::Success));
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(service.clone())
        .start_time(t("2013-11-27T14:00Z"))
        .build()
        .unwrap();
    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler =
        Scheduler::new(configuration, Arc::clone(&storage), SchedulerConfig::new(2)).unwrap();

    let slot = SlotId::new("wordcount", t("2013-11-27T14:00Z"));
    scheduler.step(t("2013-11-27T15:01Z"), None).await;
    scheduler.step(t("2013-11-27T15:01Z"), None).await;
    let state = storage.get_slot_state(&slot).await.unwrap().unwrap();
    assert_eq!(state.status(), SlotStatus::Success);
    assert_eq!(service.submitted().len(), 2);

    scheduler
        .mark_for_rerun(&slot, t("2013-11-27T16:00Z"))
        .await
        .unwrap();
    let state = storage.get_slot_state(&slot).await.unwrap().unwrap();
    assert_eq!(state.status(), SlotStatus::Waiting);
    assert_eq!(state.retry_count(), 0);

    // 14:00 is outside a two-hour window at 18:01.
    let report = scheduler.step(t("2013-11-27T18:01Z"), None).await;
    assert!(report.is_success());
    let state = storage.get_slot_state(&slot).await.unwrap().unwrap();
    assert_eq!(state.status(), SlotStatus::Running);
    assert_eq!(
        service.submitted().iter().filter(|id| **id == slot).count(),
        2
    );
}

/// Test: Rerun requests sent through the handle are applied by the loop.
#[tokio::test]
async fn test_rerun_through_handle() {
    let service = Arc::new(MockExternalService::with_status(ExternalStatus::Success));
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(service.clone())
        .start_time(t("2013-11-27T14:00Z"))
        .build()
        .unwrap();
    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler =
        Scheduler::new(configuration, Arc::clone(&storage), SchedulerConfig::new(2)).unwrap();
    let (handle, task) = scheduler.start();

    let slot = SlotId::new("wordcount", t("2013-11-27T14:00Z"));
    handle.step(t("2013-11-27T15:01Z"), None).await.unwrap();
    handle.step(t("2013-11-27T15:01Z"), None).await.unwrap();

    handle.mark_for_rerun(slot.clone()).await.unwrap();
    let state = storage.get_slot_state(&slot).await.unwrap().unwrap();
    assert_eq!(state.status(), SlotStatus::Waiting);

    let unknown = SlotId::new("unknown", t("2013-11-27T14:00Z"));
    assert!(handle.mark_for_rerun(unknown).await.is_err());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

/// Test: A dependency chain settles after a few steps, and every transition
/// is reported on the event bus.
#[tokio::test]
async fn test_dependency_chain_with_events() {
    let service = Arc::new(MockExternalService::with_status(ExternalStatus::Success));
    let mut configuration = WorkflowConfiguration::new();
    for (id, trigger) in [
        ("extract", Trigger::Always),
        ("transform", Trigger::success("extract")),
        ("load", Trigger::success("transform")),
    ] {
        let workflow = Workflow::builder(id)
            .schedule(Schedule::hourly())
            .trigger(trigger)
            .external_service(service.clone())
            .start_time(t("2013-11-27T15:00Z"))
            .build()
            .unwrap();
        configuration.add_workflow(workflow).unwrap();
    }

    let recorder = Arc::new(RecordingHandler::new());
    let event_bus = EventBus::new();
    event_bus.register(recorder.clone()).await;

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler = Scheduler::new(configuration, Arc::clone(&storage), SchedulerConfig::new(24))
        .unwrap()
        .with_event_bus(event_bus);

    let now = t("2013-11-27T15:01Z");
    for _ in 0..6 {
        assert!(scheduler.step(now, None).await.is_success());
    }

    for id in ["extract", "transform", "load"] {
        let slot = SlotId::new(id, t("2013-11-27T15:00Z"));
        let state = storage.get_slot_state(&slot).await.unwrap().unwrap();
        assert_eq!(state.status(), SlotStatus::Success, "{}", id);
    }

    let events = recorder.events().await;
    let successes = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                Event::SlotTransitioned {
                    to: SlotStatus::Success,
                    ..
                }
            )
        })
        .count();
    assert_eq!(successes, 3);
    let steps = events
        .iter()
        .filter(|e| matches!(e, Event::StepCompleted { .. }))
        .count();
    assert_eq!(steps, 6);
}

/// Test: The periodic loop steps on its own until a slot succeeds.
#[tokio::test]
async fn test_periodic_loop_advances_slots() {
    let service = Arc::new(MockExternalService::with_status(ExternalStatus::Success));
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(service.clone())
        .build()
        .unwrap();
    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler = Scheduler::new(configuration, Arc::clone(&storage), SchedulerConfig::new(2))
        .unwrap()
        .with_step_interval(Duration::from_millis(20));
    let (handle, task) = scheduler.start();

    let previous_hour = ScheduledTime::now().full_hour().plus_hours(-1).unwrap();
    let slot = SlotId::new("wordcount", previous_hour);
    wait_for_slot_status(
        storage.as_ref(),
        &slot,
        SlotStatus::Success,
        Duration::from_secs(5),
    )
    .await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

async fn step_count(recorder: &RecordingHandler) -> usize {
    recorder
        .events()
        .await
        .iter()
        .filter(|e| matches!(e, Event::StepCompleted { .. }))
        .count()
}

/// Test: Pausing the loop stops periodic steps.
#[tokio::test]
async fn test_paused_loop_does_not_step() {
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(Arc::new(MockExternalService::new()))
        .build()
        .unwrap();
    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();

    let recorder = Arc::new(RecordingHandler::new());
    let event_bus = EventBus::new();
    event_bus.register(recorder.clone()).await;

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler = Scheduler::new(configuration, storage, SchedulerConfig::new(2))
        .unwrap()
        .with_event_bus(event_bus)
        .with_step_interval(Duration::from_millis(20));
    let (handle, task) = scheduler.start();
    handle.pause().await.unwrap();

    let paused_steps = step_count(&recorder).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(step_count(&recorder).await, paused_steps);

    handle.resume().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while step_count(&recorder).await == paused_steps {
        assert!(tokio::time::Instant::now() < deadline, "loop did not resume");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
