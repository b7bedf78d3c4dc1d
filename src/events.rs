//! Orchestration event stream.
//!
//! Events are an append-only observer stream for display, never control
//! flow. They are published over an unbounded channel so a slow or dropped
//! listener can never stall the engine; every emit is fire-and-forget.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::plan::TaskResult;

/// Events emitted by the orchestrator across a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// The run has started.
    OrchestrationStart { total_phases: usize },
    /// A phase has started execution.
    PhaseStart { phase: u32, name: String },
    /// A phase finished (success or failure).
    PhaseComplete {
        phase: u32,
        success: bool,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// A task attempt has started.
    TaskStart { task_id: String, attempt: u32 },
    /// An output chunk arrived from the agent for a running task.
    TaskProgress { task_id: String, chunk: String },
    /// A task attempt failed and another attempt is about to start.
    TaskRetry {
        task_id: String,
        attempt: u32,
        reason: String,
    },
    /// A task finished successfully.
    TaskComplete {
        task_id: String,
        result: Box<TaskResult>,
    },
    /// A task exhausted its retries (or was aborted).
    TaskFailed {
        task_id: String,
        result: Box<TaskResult>,
    },
    /// The run finished normally.
    OrchestrationComplete {
        phases_completed: usize,
        phases_failed: usize,
        duration_ms: u64,
    },
    /// The run was cancelled before finishing.
    OrchestrationAborted {
        phases_completed: usize,
        duration_ms: u64,
    },
}

/// Best-effort event publisher.
///
/// Cloneable and cheap; `emit` never blocks and ignores a closed channel.
/// A sink constructed with `EventSink::disabled()` drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<OrchestrationEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver the caller consumes for display.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OrchestrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards all events.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event. Never blocks; a gone receiver is not an error.
    pub fn emit(&self, event: OrchestrationEvent) {
        if let Some(ref tx) = self.tx {
            tx.send(event).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = OrchestrationEvent::TaskStart {
            task_id: "1.1".into(),
            attempt: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"task_start\""));
        assert!(json.contains("1.1"));

        let event = OrchestrationEvent::OrchestrationAborted {
            phases_completed: 2,
            duration_ms: 10,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("orchestration_aborted"));
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(OrchestrationEvent::OrchestrationStart { total_phases: 2 });
        sink.emit(OrchestrationEvent::PhaseStart {
            phase: 1,
            name: "Setup".into(),
        });

        match rx.recv().await.unwrap() {
            OrchestrationEvent::OrchestrationStart { total_phases } => {
                assert_eq!(total_phases, 2)
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            OrchestrationEvent::PhaseStart { phase, .. } => assert_eq!(phase, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_sink_ignores_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        // Must not panic or block.
        sink.emit(OrchestrationEvent::OrchestrationStart { total_phases: 1 });
    }

    #[test]
    fn test_disabled_sink() {
        let sink = EventSink::disabled();
        sink.emit(OrchestrationEvent::OrchestrationStart { total_phases: 1 });
    }
}
