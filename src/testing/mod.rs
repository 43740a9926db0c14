//! Testing utilities for users of the hourglass library.
//!
//! This module provides in-memory stand-ins for the scheduler's collaborators:
//!
//! - [`MockExternalService`]: reports a fixed status and records every call
//! - [`FlakyExternalService`]: fails the first N jobs, then succeeds
//! - [`InMemoryDataStore`]: a data store backed by a set of paths
//! - [`RecordingStateDatabase`]: a state database that records writes and
//!   can be told to fail
//! - [`RecordingHandler`]: an event handler that keeps every event

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use crate::core::slot::SlotState;
use crate::core::store::{DataStore, DataStoreError};
use crate::core::time::ScheduledTime;
use crate::core::types::{ExternalId, SlotId, WorkflowId};
use crate::events::{Event, EventHandler};
use crate::external::{ExternalService, ExternalServiceError, ExternalStatus};
use crate::storage::{InMemoryStateDatabase, StateDatabase, StorageError};

/// An external service that reports a configurable status for every job.
///
/// # Example
///
/// ```
/// use hourglass::external::{ExternalService, ExternalStatus};
/// use hourglass::testing::MockExternalService;
///
/// let service = MockExternalService::with_status(ExternalStatus::Success);
/// service.set_fail_start(true);
/// assert!(service.submitted().is_empty());
/// ```
pub struct MockExternalService {
    status: Mutex<ExternalStatus>,
    next_id: AtomicU32,
    submitted: Mutex<Vec<SlotId>>,
    started: Mutex<Vec<(SlotId, ExternalId)>>,
    killed: Mutex<Vec<(SlotId, ExternalId)>>,
    fail_submit: AtomicBool,
    fail_start: AtomicBool,
    fail_status: AtomicBool,
}

impl MockExternalService {
    /// A service whose jobs run forever.
    pub fn new() -> Self {
        Self::with_status(ExternalStatus::Running)
    }

    /// A service whose jobs all report `status`.
    pub fn with_status(status: ExternalStatus) -> Self {
        Self {
            status: Mutex::new(status),
            next_id: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            fail_submit: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
        }
    }

    /// Change the status reported from now on.
    pub fn set_status(&self, status: ExternalStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    /// Slots submitted so far, in call order.
    pub fn submitted(&self) -> Vec<SlotId> {
        self.submitted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Jobs started so far, in call order.
    pub fn started(&self) -> Vec<(SlotId, ExternalId)> {
        self.started.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Jobs killed so far, in call order.
    pub fn killed(&self) -> Vec<(SlotId, ExternalId)> {
        self.killed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Default for MockExternalService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExternalService for MockExternalService {
    async fn submit(&self, slot_id: &SlotId) -> Result<ExternalId, ExternalServiceError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ExternalServiceError::Submit {
                slot_id: slot_id.clone(),
                message: "injected submit error".into(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?
            .push(slot_id.clone());
        Ok(ExternalId::new(format!("mock-{}", n)))
    }

    async fn start(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ExternalServiceError::Start {
                external_id: external_id.clone(),
                message: "injected start error".into(),
            });
        }
        self.started
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?
            .push((slot_id.clone(), external_id.clone()));
        Ok(())
    }

    async fn status(
        &self,
        _slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<ExternalStatus, ExternalServiceError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(ExternalServiceError::Status {
                external_id: external_id.clone(),
                message: "injected status error".into(),
            });
        }
        self.status
            .lock()
            .map(|status| *status)
            .map_err(|_| ExternalServiceError::LockPoisoned)
    }

    async fn kill(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError> {
        self.killed
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?
            .push((slot_id.clone(), external_id.clone()));
        Ok(())
    }
}

/// An external service whose first `fail_count` jobs fail and whose later
/// jobs succeed.
///
/// Jobs are numbered in submission order across all slots.
pub struct FlakyExternalService {
    fail_count: u32,
    submissions: AtomicU32,
    attempts: Mutex<HashMap<ExternalId, u32>>,
}

impl FlakyExternalService {
    pub fn new(fail_count: u32) -> Self {
        Self {
            fail_count,
            submissions: AtomicU32::new(0),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// A service where every job fails.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Number of jobs submitted so far.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalService for FlakyExternalService {
    async fn submit(&self, _slot_id: &SlotId) -> Result<ExternalId, ExternalServiceError> {
        let attempt = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let external_id = ExternalId::new(format!("attempt-{}", attempt));
        self.attempts
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?
            .insert(external_id.clone(), attempt);
        Ok(external_id)
    }

    async fn start(
        &self,
        _slot_id: &SlotId,
        _external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError> {
        Ok(())
    }

    async fn status(
        &self,
        _slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<ExternalStatus, ExternalServiceError> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?;
        let attempt = attempts
            .get(external_id)
            .ok_or_else(|| ExternalServiceError::UnknownJob(external_id.clone()))?;
        if *attempt <= self.fail_count {
            Ok(ExternalStatus::Failure)
        } else {
            Ok(ExternalStatus::Success)
        }
    }

    async fn kill(
        &self,
        _slot_id: &SlotId,
        _external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError> {
        Ok(())
    }
}

/// A data store holding a fixed set of paths.
#[derive(Default)]
pub struct InMemoryDataStore {
    paths: RwLock<HashSet<String>>,
    fail: AtomicBool,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path(&self, path: impl Into<String>) {
        if let Ok(mut paths) = self.paths.write() {
            paths.insert(path.into());
        }
    }

    pub fn remove_path(&self, path: &str) {
        if let Ok(mut paths) = self.paths.write() {
            paths.remove(path);
        }
    }

    /// Make every existence check fail as if the store were unreachable.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn exists(&self, path: &str) -> Result<bool, DataStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DataStoreError::Unavailable("injected store error".into()));
        }
        let paths = self.paths.read().map_err(|_| DataStoreError::LockPoisoned)?;
        Ok(paths.contains(path))
    }
}

/// A state database that records every write and every workflow it is asked
/// about, and can be told to fail for chosen workflows.
///
/// Wraps an [`InMemoryStateDatabase`].
#[derive(Default)]
pub struct RecordingStateDatabase {
    inner: InMemoryStateDatabase,
    puts: Mutex<Vec<SlotState>>,
    lookups: Mutex<Vec<SlotId>>,
    touched: Mutex<BTreeSet<WorkflowId>>,
    failing: Mutex<HashSet<WorkflowId>>,
    fail_puts: AtomicBool,
}

impl RecordingStateDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped database, for seeding state without recording it.
    pub fn inner(&self) -> &InMemoryStateDatabase {
        &self.inner
    }

    /// Every state written so far, in call order.
    pub fn puts(&self) -> Vec<SlotState> {
        self.puts.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Writes for one slot, in call order.
    pub fn puts_for(&self, slot_id: &SlotId) -> Vec<SlotState> {
        self.puts()
            .into_iter()
            .filter(|state| state.slot_id() == slot_id)
            .collect()
    }

    /// Slots read one at a time through `get_slot_state`, in call order.
    pub fn lookups(&self) -> Vec<SlotId> {
        self.lookups.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Forget recorded writes, lookups and touched workflows.
    pub fn clear(&self) {
        if let Ok(mut puts) = self.puts.lock() {
            puts.clear();
        }
        if let Ok(mut lookups) = self.lookups.lock() {
            lookups.clear();
        }
        if let Ok(mut touched) = self.touched.lock() {
            touched.clear();
        }
    }

    /// Workflows that were read or written.
    pub fn touched_workflows(&self) -> BTreeSet<WorkflowId> {
        self.touched.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Make every operation on `workflow_id` fail.
    pub fn fail_workflow(&self, workflow_id: impl Into<WorkflowId>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(workflow_id.into());
        }
    }

    /// Make every write fail.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    fn touch(&self, workflow_id: &WorkflowId) -> Result<(), StorageError> {
        self.touched
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(workflow_id.clone());
        let failing = self.failing.lock().map_err(|_| StorageError::LockPoisoned)?;
        if failing.contains(workflow_id) {
            return Err(StorageError::Other(format!(
                "injected error for workflow {}",
                workflow_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StateDatabase for RecordingStateDatabase {
    async fn get_slot_state(&self, slot_id: &SlotId) -> Result<Option<SlotState>, StorageError> {
        self.touch(slot_id.workflow_id())?;
        self.lookups
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(slot_id.clone());
        self.inner.get_slot_state(slot_id).await
    }

    async fn put_slot_state(&self, state: SlotState) -> Result<(), StorageError> {
        self.touch(state.workflow_id())?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Other("injected put_slot_state error".into()));
        }
        self.puts
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(state.clone());
        self.inner.put_slot_state(state).await
    }

    async fn get_slot_states(
        &self,
        workflow_id: &WorkflowId,
        from: ScheduledTime,
        to: ScheduledTime,
    ) -> Result<BTreeMap<SlotId, SlotState>, StorageError> {
        self.touch(workflow_id)?;
        self.inner.get_slot_states(workflow_id, from, to).await
    }

    async fn get_times_marked_for_rerun(
        &self,
        workflow_id: &WorkflowId,
        now: ScheduledTime,
    ) -> Result<BTreeSet<ScheduledTime>, StorageError> {
        self.touch(workflow_id)?;
        self.inner.get_times_marked_for_rerun(workflow_id, now).await
    }

    async fn mark_slot_for_rerun(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError> {
        self.touch(slot_id.workflow_id())?;
        self.inner.mark_slot_for_rerun(slot_id, now).await
    }

    async fn clear_rerun_mark(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError> {
        self.touch(slot_id.workflow_id())?;
        self.inner.clear_rerun_mark(slot_id, now).await
    }

    async fn list_workflow_ids(&self) -> Result<Vec<WorkflowId>, StorageError> {
        self.inner.list_workflow_ids().await
    }
}

/// Event handler that keeps every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
