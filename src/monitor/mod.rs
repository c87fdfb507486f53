//! Monitoring core: one check cycle, the failure policy that can halt it, and
//! the scheduler that repeats it.

pub mod breaker;
pub mod cycle;
pub mod events;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

pub use breaker::{BreakerDecision, BreakerSnapshot, BreakerState, FailurePolicy};
pub use cycle::{CycleOrchestrator, CycleOutcome, CyclePhase, CycleResult, CycleSettings};
pub use events::{EventBus, MonitorEvent};
pub use scheduler::{RunSlot, Scheduler, SchedulerState, StopReason, TriggerOutcome};

use crate::config::Config;
use crate::notify::Dispatcher;
use crate::session::SessionDriver;
use crate::snapshot::SnapshotStore;

/// Wires an orchestrator from a validated configuration.
pub fn build_orchestrator(
    config: &Config,
    driver: Arc<dyn SessionDriver>,
    bus: &EventBus,
) -> CycleOrchestrator {
    CycleOrchestrator::new(
        driver,
        SnapshotStore::new(config.resolved_snapshot_path()),
        Dispatcher::from_config(&config.alerts, bus),
        Arc::new(FailurePolicy::from_config(&config.failure_policy)),
        bus.clone(),
        CycleSettings::from_config(config),
    )
}

pub fn schedule_interval(config: &Config) -> Duration {
    Duration::from_secs(config.schedule.interval_minutes.saturating_mul(60))
}
