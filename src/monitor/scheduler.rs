use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::breaker::BreakerSnapshot;
use crate::monitor::cycle::{CycleOrchestrator, CycleResult};

/// A tick that fires this late elapsed while a cycle was running.
const LATE_TICK_TOLERANCE: Duration = Duration::from_secs(1);

/// Single-occupancy slot. At most one cycle holds it at any moment.
#[derive(Debug)]
pub struct RunSlot {
    permit: Semaphore,
}

impl Default for RunSlot {
    fn default() -> Self {
        Self {
            permit: Semaphore::new(1),
        }
    }
}

impl RunSlot {
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.permit.try_acquire().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Waits for the current holder to finish, then keeps the slot taken for good.
    pub async fn seal(&self) {
        if let Ok(permit) = self.permit.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    BreakerTripped,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(Box<CycleResult>),
    /// Another cycle holds the run slot; nothing was queued.
    Busy,
    Halted,
    Stopped,
}

struct Shared {
    orchestrator: Arc<CycleOrchestrator>,
    interval: Duration,
    slot: RunSlot,
    cancel: CancellationToken,
    /// Fired by whichever cycle trips the failure policy.
    tripped: CancellationToken,
    stopped: AtomicBool,
    last_result: Mutex<Option<CycleResult>>,
}

/// Runs a check immediately and then on a fixed interval until stopped.
///
/// Cheap to clone; clones share the same run slot and stop token, so a
/// handle can be given to the status API while `run` drives the loop.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<CycleOrchestrator>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                interval: interval.max(Duration::from_secs(1)),
                slot: RunSlot::default(),
                cancel: CancellationToken::new(),
                tripped: CancellationToken::new(),
                stopped: AtomicBool::new(false),
                last_result: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Requests a stop. A cycle in flight finishes, including session cleanup.
    pub fn stop(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("stop requested");
        }
        self.shared.cancel.cancel();
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.stopped.load(Ordering::SeqCst) {
            SchedulerState::Stopped
        } else if self.shared.slot.is_busy() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn breaker(&self) -> BreakerSnapshot {
        self.shared.orchestrator.policy().snapshot()
    }

    pub fn last_result(&self) -> Option<CycleResult> {
        self.shared
            .last_result
            .lock()
            .ok()
            .and_then(|last| last.clone())
    }

    /// Runs one cycle now unless one is already running or monitoring ended.
    pub async fn trigger_now(&self) -> TriggerOutcome {
        if self.shared.orchestrator.policy().is_tripped() {
            return TriggerOutcome::Halted;
        }
        if self.shared.stopped.load(Ordering::SeqCst) || self.shared.cancel.is_cancelled() {
            return TriggerOutcome::Stopped;
        }
        match self.run_guarded().await {
            Some(result) => TriggerOutcome::Completed(Box::new(result)),
            None => TriggerOutcome::Busy,
        }
    }

    pub async fn run(&self) -> StopReason {
        let shared = &self.shared;
        info!(
            interval_secs = shared.interval.as_secs(),
            "grade monitoring started"
        );
        let mut ticker = tokio::time::interval(shared.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            let scheduled = tokio::select! {
                biased;
                _ = shared.tripped.cancelled() => break StopReason::BreakerTripped,
                _ = shared.cancel.cancelled() => break StopReason::Requested,
                scheduled = ticker.tick() => scheduled,
            };
            if shared.cancel.is_cancelled() {
                break StopReason::Requested;
            }
            if shared.orchestrator.policy().is_tripped() {
                break StopReason::BreakerTripped;
            }
            if Instant::now().saturating_duration_since(scheduled) > LATE_TICK_TOLERANCE {
                debug!("tick elapsed during a running cycle, skipping");
                continue;
            }
            if self.run_guarded().await.is_none() {
                debug!("cycle already running, skipping tick");
            }
            if shared.orchestrator.policy().is_tripped() {
                break StopReason::BreakerTripped;
            }
        };

        shared.cancel.cancel();
        if shared.slot.is_busy() {
            info!("waiting for the running check to finish");
        }
        shared.slot.seal().await;
        shared.stopped.store(true, Ordering::SeqCst);
        match reason {
            StopReason::Requested => info!("grade monitoring stopped"),
            StopReason::BreakerTripped => warn!("grade monitoring halted by failure policy"),
        }
        shared.orchestrator.events().status("Monitoring stopped");
        reason
    }

    async fn run_guarded(&self) -> Option<CycleResult> {
        let _guard = self.shared.slot.try_acquire()?;
        let result = self.shared.orchestrator.run_cycle().await;
        if result.halted {
            self.shared.tripped.cancel();
        }
        if let Ok(mut last) = self.shared.last_result.lock() {
            *last = Some(result.clone());
        }
        Some(result)
    }
}
