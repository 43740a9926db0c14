//! API integration tests.
//!
//! These tests drive the router directly with `tower::ServiceExt::oneshot`.

use crate::common::t;
use hourglass::api::{ApiState, build_router, create_api_state};
use hourglass::testing::MockExternalService;
use hourglass::{
    InMemoryStateDatabase, Schedule, Scheduler, SchedulerConfig, SchedulerHandle, SlotId,
    SlotState, SlotStatus, StateDatabase, Trigger, Workflow, WorkflowConfiguration,
};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApi {
    state: ApiState<InMemoryStateDatabase>,
    service: Arc<MockExternalService>,
    handle: SchedulerHandle,
}

/// Create a test API with one hourly workflow starting at 12:00.
fn create_test_api() -> TestApi {
    create_test_api_with(Vec::new())
}

fn create_test_api_with(extra: Vec<Workflow>) -> TestApi {
    let service = Arc::new(MockExternalService::new());
    let workflow = Workflow::builder("wordcount")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(service.clone())
        .start_time(t("2013-11-27T12:00Z"))
        .build()
        .unwrap();

    let mut configuration = WorkflowConfiguration::new();
    configuration.add_workflow(workflow).unwrap();
    for workflow in extra {
        configuration.add_workflow(workflow).unwrap();
    }
    let configuration = Arc::new(configuration);

    let storage = Arc::new(InMemoryStateDatabase::new());
    let scheduler = Scheduler::new(
        Arc::clone(&configuration),
        Arc::clone(&storage),
        SchedulerConfig::new(24),
    )
    .unwrap();
    let (handle, _task) = scheduler.start();

    TestApi {
        state: create_api_state(handle.clone(), storage, configuration),
        service,
        handle,
    }
}

async fn send(api: &TestApi, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = build_router(api.state.clone())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn step(api: &TestApi) -> (StatusCode, Value) {
    send(api, Method::POST, "/api/scheduler/step?time=2013-11-27T15:01Z").await
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let api = create_test_api();
    let (status, json) = send(&api, Method::GET, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Scheduler state endpoint reflects pause and resume.
#[tokio::test]
async fn test_pause_and_resume() {
    let api = create_test_api();

    let (status, json) = send(&api, Method::GET, "/api/scheduler/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
    assert_eq!(json["is_paused"], false);

    let (status, _) = send(&api, Method::POST, "/api/scheduler/pause").await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&api, Method::GET, "/api/scheduler/state").await;
    assert_eq!(json["state"], "paused");
    assert_eq!(json["is_paused"], true);

    let (status, _) = send(&api, Method::POST, "/api/scheduler/resume").await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&api, Method::GET, "/api/scheduler/state").await;
    assert_eq!(json["state"], "running");
}

/// Test: Workflow listing and lookup.
#[tokio::test]
async fn test_workflow_endpoints() {
    let api = create_test_api();

    let (status, json) = send(&api, Method::GET, "/api/workflows").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["workflows"][0]["id"], "wordcount");
    assert_eq!(json["unconfigured"], serde_json::json!([]));

    let (status, json) = send(&api, Method::GET, "/api/workflows/wordcount").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["schedule"], "@hourly");
    assert_eq!(json["timezone"], "UTC");
    assert_eq!(json["start_time"], "2013-11-27T12:00:00Z");

    let (status, json) = send(&api, Method::GET, "/api/workflows/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: Workflows that only exist in storage are listed separately.
#[tokio::test]
async fn test_workflow_list_reports_unconfigured_state() {
    let api = create_test_api();
    step(&api).await;
    api.state
        .storage
        .put_slot_state(SlotState::waiting(SlotId::new(
            "retired",
            t("2013-11-27T15:00Z"),
        )))
        .await
        .unwrap();

    let (status, json) = send(&api, Method::GET, "/api/workflows").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 1);
    assert_eq!(json["unconfigured"], serde_json::json!(["retired"]));
}

/// Test: A step at an explicit time starts every slot of the window.
#[tokio::test]
async fn test_step_endpoint_advances_slots() {
    let api = create_test_api();

    let (status, json) = step(&api).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["time"], "2013-11-27T15:01:00Z");
    assert_eq!(json["processed"], serde_json::json!(["wordcount"]));
    assert_eq!(json["failures"], serde_json::json!([]));

    let (status, json) = send(
        &api,
        Method::GET,
        "/api/workflows/wordcount/slots?start=2013-11-27T00:00Z&end=2013-11-28T00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 4);
    for slot in json["slots"].as_array().unwrap() {
        assert_eq!(slot["status"], "RUNNING");
        assert!(slot["external_id"].is_string());
    }
    assert_eq!(json["slots"][0]["scheduled_time"], "2013-11-27T12:00:00Z");
    assert_eq!(api.service.started().len(), 4);
}

/// Test: An unparsable step time is rejected.
#[tokio::test]
async fn test_step_rejects_bad_time() {
    let api = create_test_api();
    let (status, json) = send(&api, Method::POST, "/api/scheduler/step?time=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
}

/// Test: A step with a failing workflow answers 500 and names the failure,
/// while the healthy workflow is still processed.
#[tokio::test]
async fn test_step_reports_failures() {
    let broken = Workflow::builder("broken")
        .schedule(Schedule::hourly())
        .trigger(Trigger::data_exists("/_READY", "hdfs://namenode"))
        .external_service(Arc::new(MockExternalService::new()))
        .start_time(t("2013-11-27T12:00Z"))
        .build()
        .unwrap();
    let api = create_test_api_with(vec![broken]);

    let (status, json) = step(&api).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["processed"], serde_json::json!(["wordcount"]));
    assert_eq!(json["failures"][0]["workflow_id"], "broken");
    assert!(json["failures"][0]["error"].is_string());
}

/// Test: Stepping a subset leaves other workflows untouched.
#[tokio::test]
async fn test_step_with_workflow_filter() {
    let other = Workflow::builder("other")
        .schedule(Schedule::hourly())
        .trigger(Trigger::Always)
        .external_service(Arc::new(MockExternalService::new()))
        .start_time(t("2013-11-27T12:00Z"))
        .build()
        .unwrap();
    let api = create_test_api_with(vec![other]);

    let (status, json) = send(
        &api,
        Method::POST,
        "/api/scheduler/step?time=2013-11-27T15:01Z&workflows=other,unknown",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["processed"], serde_json::json!(["other"]));

    let untouched = SlotId::new("wordcount", t("2013-11-27T15:00Z"));
    assert!(
        api.state
            .storage
            .get_slot_state(&untouched)
            .await
            .unwrap()
            .is_none()
    );
}

/// Test: Slot lookup, before and after the slot exists.
#[tokio::test]
async fn test_get_slot() {
    let api = create_test_api();

    let (status, _) = send(&api, Method::GET, "/api/slots/wordcount/2013-11-27T15:00Z").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    step(&api).await;
    let (status, json) = send(&api, Method::GET, "/api/slots/wordcount/2013-11-27T15:00Z").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["workflow_id"], "wordcount");
    assert_eq!(json["status"], "RUNNING");
    assert_eq!(json["retry_count"], 0);

    let (status, _) = send(&api, Method::GET, "/api/slots/missing/2013-11-27T15:00Z").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&api, Method::GET, "/api/slots/wordcount/noon").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: The trigger endpoint returns the evaluated trigger tree.
#[tokio::test]
async fn test_trigger_status_endpoint() {
    let api = create_test_api();

    let (status, json) = send(
        &api,
        Method::GET,
        "/api/slots/wordcount/2013-11-27T15:00Z/trigger",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["type"], "always");
    assert_eq!(json["ready"], true);
    assert_eq!(json["sub_statuses"], serde_json::json!([]));
}

/// Test: Rerunning a slot resets it to WAITING.
#[tokio::test]
async fn test_rerun_endpoint() {
    let api = create_test_api();
    step(&api).await;

    let (status, json) = send(
        &api,
        Method::POST,
        "/api/slots/wordcount/2013-11-27T13:00Z/rerun",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("rerun"));

    let slot = SlotId::new("wordcount", t("2013-11-27T13:00Z"));
    let state = api.state.storage.get_slot_state(&slot).await.unwrap().unwrap();
    assert_eq!(state.status(), SlotStatus::Waiting);
    assert!(state.external_id().is_none());

    let (status, _) = send(&api, Method::POST, "/api/slots/missing/2013-11-27T13:00Z/rerun").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: Killing requires a running slot and leaves its state alone.
#[tokio::test]
async fn test_kill_endpoint() {
    let api = create_test_api();

    let (status, _) = send(&api, Method::POST, "/api/slots/wordcount/2013-11-27T15:00Z/kill").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    step(&api).await;
    let (status, _) = send(&api, Method::POST, "/api/slots/wordcount/2013-11-27T15:00Z/kill").await;
    assert_eq!(status, StatusCode::OK);

    let killed = api.service.killed();
    assert_eq!(killed.len(), 1);
    assert_eq!(killed[0].0, SlotId::new("wordcount", t("2013-11-27T15:00Z")));

    let state = api
        .state
        .storage
        .get_slot_state(&killed[0].0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status(), SlotStatus::Running);

    // Rerun resets the slot, after which there is nothing to kill.
    send(&api, Method::POST, "/api/slots/wordcount/2013-11-27T15:00Z/rerun").await;
    let (status, json) =
        send(&api, Method::POST, "/api/slots/wordcount/2013-11-27T15:00Z/kill").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

/// Test: Requests after shutdown report the scheduler as unavailable.
#[tokio::test]
async fn test_step_after_shutdown() {
    let api = create_test_api();
    api.handle.shutdown().await.unwrap();

    let (status, json) = step(&api).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}
