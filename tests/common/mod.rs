//! Common test utilities shared across integration tests.

use hourglass::{ScheduledTime, SlotId, SlotState, SlotStatus, StateDatabase, WorkflowId};
use std::path::Path;
use std::time::Duration;

/// Parse a time literal such as `2013-11-27T15:01Z`.
pub fn t(s: &str) -> ScheduledTime {
    s.parse().unwrap()
}

/// Write `body` to `<dir>/<id>.yaml`.
pub fn write_workflow(dir: &Path, id: &str, body: &str) {
    std::fs::write(dir.join(format!("{}.yaml", id)), body).unwrap();
}

/// Statuses of a workflow's persisted slots in `[from, to)`, oldest first.
pub async fn statuses(
    storage: &dyn StateDatabase,
    workflow_id: &str,
    from: &str,
    to: &str,
) -> Vec<SlotStatus> {
    storage
        .get_slot_states(&WorkflowId::new(workflow_id), t(from), t(to))
        .await
        .unwrap()
        .values()
        .map(SlotState::status)
        .collect()
}

/// Wait for a slot to reach an expected status, polling storage.
///
/// Polls every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_slot_status(
    storage: &dyn StateDatabase,
    slot_id: &SlotId,
    expected: SlotStatus,
    timeout: Duration,
) -> SlotState {
    let start = tokio::time::Instant::now();
    loop {
        let state = storage.get_slot_state(slot_id).await.unwrap();
        if let Some(state) = &state
            && state.status() == expected
        {
            return state.clone();
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for slot {} to reach {}, current state: {:?}",
                slot_id, expected, state
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
