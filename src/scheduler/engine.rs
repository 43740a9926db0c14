//! Scheduler engine implementation.
//!
//! One call to [`Scheduler::step`] reconciles every selected workflow at a
//! given instant: it enumerates the slots of the sliding window, merges in
//! persisted state and slots marked for rerun, advances each slot through
//! the state machine, and finally starts whatever the workflow's scheduling
//! strategy admits.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::core::slot::{SlotState, SlotStatus};
use crate::core::store::DataStores;
use crate::core::time::ScheduledTime;
use crate::core::trigger::{TriggerContext, TriggerStatus};
use crate::core::types::{SlotId, WorkflowId};
use crate::core::workflow::{Workflow, WorkflowConfiguration};
use crate::events::{Event, EventBus};
use crate::external::ExternalStatus;
use crate::storage::StateDatabase;

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::types::{
    SchedulerCommand, SchedulerConfig, SchedulerError, SchedulerState, StepReport,
    WorkflowFailure,
};

/// Reconciles persisted slot state with the workflow configuration.
pub struct Scheduler<S: StateDatabase> {
    /// Workflows known to the scheduler.
    configuration: Arc<WorkflowConfiguration>,
    /// Slot state and rerun marks.
    storage: Arc<S>,
    /// Hours looked back from `now` on every step.
    sliding_window_hours: u32,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    /// Data store cache used by data triggers.
    data_stores: Arc<DataStores>,
    /// Period of automatic steps once started (None = explicit steps only).
    step_interval: Option<Duration>,
}

impl<S: StateDatabase + 'static> Scheduler<S> {
    /// Create a scheduler over the given workflows and state database.
    ///
    /// Fails with [`SchedulerError::InvalidSlidingWindow`] when the window is
    /// shorter than one hour or longer than
    /// [`SchedulerConfig::MAX_SLIDING_WINDOW_HOURS`].
    pub fn new(
        configuration: impl Into<Arc<WorkflowConfiguration>>,
        storage: Arc<S>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        if config.sliding_window_hours == 0
            || config.sliding_window_hours > SchedulerConfig::MAX_SLIDING_WINDOW_HOURS
        {
            return Err(SchedulerError::InvalidSlidingWindow(
                config.sliding_window_hours,
            ));
        }

        Ok(Self {
            configuration: configuration.into(),
            storage,
            sliding_window_hours: config.sliding_window_hours,
            event_bus: Arc::new(EventBus::new()),
            data_stores: DataStores::shared(),
            step_interval: None,
        })
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Use a specific data store cache instead of the process-wide one.
    pub fn with_data_stores(mut self, data_stores: Arc<DataStores>) -> Self {
        self.data_stores = data_stores;
        self
    }

    /// Step automatically at this period once started.
    pub fn with_step_interval(mut self, interval: Duration) -> Self {
        self.step_interval = Some(interval);
        self
    }

    pub fn configuration(&self) -> &WorkflowConfiguration {
        &self.configuration
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn sliding_window_hours(&self) -> u32 {
        self.sliding_window_hours
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn data_stores(&self) -> &Arc<DataStores> {
        &self.data_stores
    }

    /// Start the scheduler loop and return a handle for controlling it.
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut ticker = self.step_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    if *state.read().await == SchedulerState::Running {
                        self.step(ScheduledTime::now(), None).await;
                    }
                }

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        tracing::info!("All scheduler handles dropped, stopping");
                        break;
                    };
                    match command {
                        SchedulerCommand::Step { now, filter, response } => {
                            let report = self.step(now, filter.as_ref()).await;
                            let _ = response.send(Ok(report));
                        }
                        SchedulerCommand::MarkForRerun { slot_id, response } => {
                            let result = self.mark_for_rerun(&slot_id, ScheduledTime::now()).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::TriggerStatus { slot_id, response } => {
                            let result = self.trigger_status(&slot_id, ScheduledTime::now()).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Kill { slot_id, response } => {
                            let result = self.kill_slot(&slot_id).await;
                            let _ = response.send(result);
                        }
                        SchedulerCommand::Pause { response } => {
                            *state.write().await = SchedulerState::Paused;
                            tracing::info!("Scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            *state.write().await = SchedulerState::Running;
                            tracing::info!("Scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            *state.write().await = SchedulerState::Stopped;
                            tracing::info!("Scheduler shut down");
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }

        *state.write().await = SchedulerState::Stopped;
    }

    /// Reconcile the selected workflows at `now`.
    ///
    /// `None` selects every configured workflow. Ids in the filter that are not
    /// configured are ignored. A failure in one workflow is recorded in the
    /// report and does not stop the others.
    pub async fn step(
        &self,
        now: ScheduledTime,
        filter: Option<&BTreeSet<WorkflowId>>,
    ) -> StepReport {
        let started = Instant::now();
        let mut report = StepReport::default();

        for workflow in self.configuration.workflows() {
            if let Some(filter) = filter
                && !filter.contains(workflow.id())
            {
                continue;
            }

            match self.step_workflow(workflow, now).await {
                Ok(()) => report.processed.push(workflow.id().clone()),
                Err(e) => {
                    tracing::error!(workflow_id = %workflow.id(), now = %now, error = %e, "Workflow step failed");
                    self.event_bus
                        .emit(Event::workflow_failed(workflow.id().clone(), e.to_string()))
                        .await;
                    report.failures.push(WorkflowFailure {
                        workflow_id: workflow.id().clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let duration = started.elapsed();
        tracing::info!(
            now = %now,
            processed = report.processed.len(),
            failed = report.failures.len(),
            "Step completed in {:?}",
            duration
        );
        self.event_bus
            .emit(Event::step_completed(
                now,
                report.processed.len(),
                report.failures.len(),
                duration,
            ))
            .await;

        report
    }

    /// Advance every slot of one workflow, then start admitted slots.
    async fn step_workflow(
        &self,
        workflow: &Workflow,
        now: ScheduledTime,
    ) -> Result<(), SchedulerError> {
        let from = self.workflow_start_time(workflow, now)?;
        let (slots, rerun) = self.collect_slot_states(workflow, now, from, now).await?;

        let mut updated = Vec::with_capacity(slots.len());
        for slot in slots {
            updated.push(self.update_slot_state(workflow, slot, now).await?);
        }

        // A rerun is over once its slot is terminal again.
        for slot in &updated {
            if slot.status().is_terminal() && rerun.contains(&slot.scheduled_time()) {
                self.storage.clear_rerun_mark(slot.slot_id(), now).await?;
                tracing::debug!(slot_id = %slot.slot_id(), "Rerun finished, mark cleared");
            }
        }

        self.run_external_workflows(workflow, &updated).await
    }

    /// Earliest instant the sliding window covers at `now`.
    pub fn sliding_window_start(&self, now: ScheduledTime) -> Result<ScheduledTime, SchedulerError> {
        Ok(now.minus_hours(self.sliding_window_hours)?)
    }

    /// Lower bound of the slots considered for `workflow` at `now`: the window
    /// start, clamped to the workflow's own start time.
    pub fn workflow_start_time(
        &self,
        workflow: &Workflow,
        now: ScheduledTime,
    ) -> Result<ScheduledTime, SchedulerError> {
        Ok(self.sliding_window_start(now)?.max(workflow.start_time()))
    }

    /// Whether a slot has waited strictly longer than `timeout_secs`.
    ///
    /// Slots scheduled after `now` never time out.
    pub fn is_slot_timed_out(
        scheduled_time: ScheduledTime,
        now: ScheduledTime,
        timeout_secs: i64,
    ) -> bool {
        now.seconds_since(&scheduled_time) > timeout_secs
    }

    /// Slot states for the scheduled times in `[from, to)` plus every time
    /// marked for rerun, in ascending time order.
    ///
    /// Times without persisted state get a fresh WAITING state. Nothing is
    /// written.
    pub async fn slot_states_including_rerun(
        &self,
        workflow: &Workflow,
        now: ScheduledTime,
        from: ScheduledTime,
        to: ScheduledTime,
    ) -> Result<Vec<SlotState>, SchedulerError> {
        let (slots, _) = self.collect_slot_states(workflow, now, from, to).await?;
        Ok(slots)
    }

    /// Like [`Scheduler::slot_states_including_rerun`], also returning the
    /// times marked for rerun.
    async fn collect_slot_states(
        &self,
        workflow: &Workflow,
        now: ScheduledTime,
        from: ScheduledTime,
        to: ScheduledTime,
    ) -> Result<(Vec<SlotState>, BTreeSet<ScheduledTime>), SchedulerError> {
        let persisted = self
            .storage
            .get_slot_states(workflow.id(), from, to)
            .await?;
        let rerun = self
            .storage
            .get_times_marked_for_rerun(workflow.id(), now)
            .await?;

        let mut times: BTreeSet<ScheduledTime> =
            workflow.schedule().scheduled_times(from, to).into_iter().collect();
        times.extend(rerun.iter().copied());

        let mut slots = Vec::with_capacity(times.len());
        for time in times {
            let slot_id = SlotId::new(workflow.id().clone(), time);
            let state = match persisted.get(&slot_id) {
                Some(state) => Some(state.clone()),
                // Outside the queried range, so look it up on its own.
                None if rerun.contains(&time) && !(from <= time && time < to) => {
                    self.storage.get_slot_state(&slot_id).await?
                }
                None => None,
            };
            slots.push(state.unwrap_or_else(|| SlotState::waiting(slot_id)));
        }

        Ok((slots, rerun))
    }

    /// Apply at most one transition to `slot` and persist it.
    ///
    /// Returns the state the slot is in afterwards. States that do not change
    /// are not written.
    pub async fn update_slot_state(
        &self,
        workflow: &Workflow,
        slot: SlotState,
        now: ScheduledTime,
    ) -> Result<SlotState, SchedulerError> {
        match slot.status() {
            SlotStatus::Waiting => {
                let ctx = TriggerContext::new(self.storage.as_ref(), &self.data_stores);
                if workflow
                    .trigger()
                    .is_ready(&ctx, now, slot.scheduled_time())
                    .await?
                {
                    let next = slot.transition_to_ready()?;
                    self.persist(&slot, next).await
                } else if Self::is_slot_timed_out(
                    slot.scheduled_time(),
                    now,
                    workflow.wait_timeout_secs(),
                ) {
                    let next = slot.transition_to_wait_timeout()?;
                    self.persist(&slot, next).await
                } else {
                    Ok(slot)
                }
            }
            SlotStatus::Running => {
                let status = match slot.external_id() {
                    Some(external_id) => {
                        workflow
                            .external_service()
                            .status(slot.slot_id(), external_id)
                            .await?
                    }
                    None => {
                        tracing::warn!(slot_id = %slot.slot_id(), "Running slot has no external id, treating as failed");
                        ExternalStatus::Failure
                    }
                };

                match status {
                    ExternalStatus::Running => Ok(slot),
                    ExternalStatus::Success => {
                        let next = slot.transition_to_success()?;
                        self.persist(&slot, next).await
                    }
                    ExternalStatus::Failure => {
                        let next = if slot.retry_count() < workflow.max_retry_count() {
                            slot.transition_to_retry()?
                        } else {
                            slot.transition_to_failure()?
                        };
                        self.persist(&slot, next).await
                    }
                }
            }
            SlotStatus::Ready
            | SlotStatus::Success
            | SlotStatus::Failure
            | SlotStatus::WaitTimeout => Ok(slot),
        }
    }

    /// Submit and start every slot the workflow's strategy admits.
    pub async fn run_external_workflows(
        &self,
        workflow: &Workflow,
        slots: &[SlotState],
    ) -> Result<(), SchedulerError> {
        let candidates = workflow.strategy().scheduling_candidates(slots);
        let service = workflow.external_service();

        for candidate in candidates {
            if candidate.status() != SlotStatus::Ready {
                return Err(SchedulerError::IllegalCandidate {
                    slot_id: candidate.slot_id().clone(),
                    status: candidate.status(),
                });
            }

            let external_id = service.submit(candidate.slot_id()).await?;
            service.start(candidate.slot_id(), &external_id).await?;
            tracing::info!(slot_id = %candidate.slot_id(), external_id = %external_id, "Started external job");

            let running = candidate.transition_to_running(external_id)?;
            self.persist(&candidate, running).await?;
        }

        Ok(())
    }

    /// Mark a slot of a configured workflow for rerun.
    pub async fn mark_for_rerun(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), SchedulerError> {
        if self
            .configuration
            .find_workflow(slot_id.workflow_id())
            .is_none()
        {
            return Err(SchedulerError::WorkflowNotFound(
                slot_id.workflow_id().clone(),
            ));
        }

        let previous = self.storage.get_slot_state(slot_id).await?;
        self.storage.mark_slot_for_rerun(slot_id, now).await?;
        tracing::info!(slot_id = %slot_id, "Marked slot for rerun");

        if let Some(previous) = previous {
            self.event_bus
                .emit(Event::slot_transitioned(
                    slot_id.clone(),
                    previous.status(),
                    SlotStatus::Waiting,
                    0,
                ))
                .await;
        }
        Ok(())
    }

    /// Kill the external job of a RUNNING slot.
    ///
    /// The slot's state is left alone; the next step observes the job's
    /// outcome through the external service.
    pub async fn kill_slot(&self, slot_id: &SlotId) -> Result<SlotState, SchedulerError> {
        let workflow = self
            .configuration
            .find_workflow(slot_id.workflow_id())
            .ok_or_else(|| SchedulerError::WorkflowNotFound(slot_id.workflow_id().clone()))?;
        let state = self
            .storage
            .get_slot_state(slot_id)
            .await?
            .ok_or_else(|| SchedulerError::SlotNotFound(slot_id.clone()))?;

        match (state.status(), state.external_id()) {
            (SlotStatus::Running, Some(external_id)) => {
                workflow
                    .external_service()
                    .kill(slot_id, external_id)
                    .await?;
                tracing::info!(slot_id = %slot_id, external_id = %external_id, "Killed external job");
                Ok(state)
            }
            _ => Err(SchedulerError::NotRunning(slot_id.clone())),
        }
    }

    /// Evaluate the workflow's trigger for one slot at `now`.
    pub async fn trigger_status(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<TriggerStatus, SchedulerError> {
        let workflow = self
            .configuration
            .find_workflow(slot_id.workflow_id())
            .ok_or_else(|| SchedulerError::WorkflowNotFound(slot_id.workflow_id().clone()))?;
        let ctx = TriggerContext::new(self.storage.as_ref(), &self.data_stores);
        Ok(workflow
            .trigger()
            .status(&ctx, now, slot_id.scheduled_time())
            .await?)
    }

    async fn persist(
        &self,
        previous: &SlotState,
        next: SlotState,
    ) -> Result<SlotState, SchedulerError> {
        self.storage.put_slot_state(next.clone()).await?;
        tracing::debug!(
            slot_id = %next.slot_id(),
            from = %previous.status(),
            to = %next.status(),
            retry_count = next.retry_count(),
            "Slot transitioned"
        );
        self.event_bus
            .emit(Event::slot_transitioned(
                next.slot_id().clone(),
                previous.status(),
                next.status(),
                next.retry_count(),
            ))
            .await;
        Ok(next)
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
