//! Observer-facing event stream.
//!
//! Emission never blocks the worker: events go into a bounded broadcast
//! channel and slow observers skip what they missed.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::monitor::cycle::{CyclePhase, CycleResult};
use crate::notify::Notification;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Phase { cycle: u64, phase: CyclePhase },
    Status { line: String },
    CycleFinished { cycle: u64, result: CycleResult },
    Notification { notification: Notification },
    Halted { consecutive_failures: u32 },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many observers received the event.
    pub fn emit(&self, event: MonitorEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn status(&self, line: impl Into<String>) -> usize {
        self.emit(MonitorEvent::Status { line: line.into() })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
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

    #[test]
    fn emit_without_observers_does_not_fail() {
        let bus = EventBus::new();
        assert_eq!(bus.status("Last check: 10:00 (success)"), 0);
    }

    #[tokio::test]
    async fn observers_receive_status_lines() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.status("Last check: 10:00 (success)");
        match rx.recv().await.expect("event") {
            MonitorEvent::Status { line } => assert_eq!(line, "Last check: 10:00 (success)"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
