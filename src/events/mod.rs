//! Scheduler events and event handling.
//!
//! The scheduler emits an [`Event`] for every persisted slot transition, for
//! every workflow whose step failed, and once at the end of every step.
//! Handlers registered on an [`EventBus`] see them in emission order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::slot::SlotStatus;
use crate::core::time::ScheduledTime;
use crate::core::types::{SlotId, WorkflowId};

/// Events emitted while stepping.
#[derive(Debug, Clone)]
pub enum Event {
    /// A slot moved to a new status and the change was persisted.
    SlotTransitioned {
        slot_id: SlotId,
        from: SlotStatus,
        to: SlotStatus,
        retry_count: u32,
        timestamp: Instant,
    },

    /// Processing of one workflow was aborted during a step.
    ///
    /// Slots persisted before the failure stay persisted.
    WorkflowFailed {
        workflow_id: WorkflowId,
        error: String,
        timestamp: Instant,
    },

    /// A step finished.
    StepCompleted {
        now: ScheduledTime,
        processed: usize,
        failed: usize,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::SlotTransitioned { timestamp, .. } => *timestamp,
            Event::WorkflowFailed { timestamp, .. } => *timestamp,
            Event::StepCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Create a SlotTransitioned event.
    pub fn slot_transitioned(slot_id: SlotId, from: SlotStatus, to: SlotStatus, retry_count: u32) -> Self {
        Event::SlotTransitioned {
            slot_id,
            from,
            to,
            retry_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a WorkflowFailed event.
    pub fn workflow_failed(workflow_id: WorkflowId, error: String) -> Self {
        Event::WorkflowFailed {
            workflow_id,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a StepCompleted event.
    pub fn step_completed(now: ScheduledTime, processed: usize, failed: usize, duration: Duration) -> Self {
        Event::StepCompleted {
            now,
            processed,
            failed,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving scheduler events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHandler;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Test handler that counts events.
    struct CountingHandler {
        count: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn slot() -> SlotId {
        SlotId::new("wordcount", "2013-11-27T15:00Z".parse().unwrap())
    }

    #[tokio::test]
    async fn test_emit_slot_transitioned_event() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::slot_transitioned(
            slot(),
            SlotStatus::Running,
            SlotStatus::Waiting,
            1,
        ))
        .await;

        let events = handler.events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::SlotTransitioned {
                slot_id,
                from,
                to,
                retry_count,
                ..
            } => {
                assert_eq!(slot_id, &slot());
                assert_eq!(*from, SlotStatus::Running);
                assert_eq!(*to, SlotStatus::Waiting);
                assert_eq!(*retry_count, 1);
            }
            _ => panic!("Expected SlotTransitioned event"),
        }
    }

    #[tokio::test]
    async fn test_emit_workflow_failed_event() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::workflow_failed(
            WorkflowId::new("wordcount"),
            "store unavailable".to_string(),
        ))
        .await;

        match &handler.events().await[0] {
            Event::WorkflowFailed {
                workflow_id, error, ..
            } => {
                assert_eq!(workflow_id.as_str(), "wordcount");
                assert_eq!(error, "store unavailable");
            }
            _ => panic!("Expected WorkflowFailed event"),
        }
    }

    #[tokio::test]
    async fn test_multiple_handlers_receive_events() {
        let counting = Arc::new(CountingHandler {
            count: AtomicU32::new(0),
        });
        let recording = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(counting.clone()).await;
        bus.register(recording.clone()).await;
        assert_eq!(bus.handler_count().await, 2);

        let now: ScheduledTime = "2013-11-27T15:01Z".parse().unwrap();
        bus.emit(Event::step_completed(now, 3, 0, Duration::from_millis(5)))
            .await;
        bus.emit(Event::step_completed(now, 3, 1, Duration::from_millis(7)))
            .await;

        assert_eq!(counting.count.load(Ordering::SeqCst), 2);
        assert_eq!(recording.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_event_timestamps_are_monotonic() {
        let first = Event::workflow_failed(WorkflowId::new("a"), "x".into());
        let second = Event::workflow_failed(WorkflowId::new("b"), "y".into());
        assert!(second.timestamp() >= first.timestamp());
    }
}
