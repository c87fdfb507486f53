use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::Serialize;

use crate::config::FailurePolicyConfig;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Armed,
    Tripped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Continue,
    /// Returned exactly once, on the failure that reaches the threshold.
    Trip,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub enabled: bool,
    pub state: BreakerState,
}

/// Counts consecutive login failures and halts monitoring at the threshold.
///
/// Shared between the worker and outside readers, so all state is atomic.
#[derive(Debug)]
pub struct FailurePolicy {
    consecutive_failures: AtomicU32,
    threshold: u32,
    enabled: bool,
    tripped: AtomicBool,
}

impl FailurePolicy {
    pub fn new(threshold: u32, enabled: bool) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            enabled,
            tripped: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &FailurePolicyConfig) -> Self {
        Self::new(config.threshold, config.enabled)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn record_login_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn record_login_failure(&self) -> BreakerDecision {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.enabled || failures < self.threshold {
            return BreakerDecision::Continue;
        }
        match self
            .tripped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => BreakerDecision::Trip,
            Err(_) => BreakerDecision::Continue,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            consecutive_failures: self.consecutive_failures(),
            threshold: self.threshold,
            enabled: self.enabled,
            state: if self.is_tripped() {
                BreakerState::Tripped
            } else {
                BreakerState::Armed
            },
        }
    }
}
