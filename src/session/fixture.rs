//! Scripted session driver for tests and offline runs.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::{MonitorError, MonitorResult};
use crate::session::{LoginOutcome, PortalSession, RawTable, SessionDriver};

/// Behaviour of the portal for one opened session.
#[derive(Debug, Clone)]
pub struct FixtureScript {
    pub open_error: Option<String>,
    pub login: LoginOutcome,
    pub term_available: bool,
    pub table: std::result::Result<RawTable, String>,
    /// Time spent inside `extract_table`, to simulate a slow portal.
    pub extract_delay: Duration,
}

impl FixtureScript {
    pub fn with_table(table: RawTable) -> Self {
        Self {
            open_error: None,
            login: LoginOutcome::Authenticated,
            term_available: true,
            table: Ok(table),
            extract_delay: Duration::ZERO,
        }
    }

    pub fn login_rejected() -> Self {
        Self {
            login: LoginOutcome::Rejected,
            ..Self::with_table(RawTable::default())
        }
    }

    pub fn open_fails(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Self::with_table(RawTable::default())
        }
    }

    pub fn term_missing() -> Self {
        Self {
            term_available: false,
            ..Self::with_table(RawTable::default())
        }
    }

    pub fn extraction_fails(message: impl Into<String>) -> Self {
        Self {
            table: Err(message.into()),
            ..Self::with_table(RawTable::default())
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.extract_delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct FixtureState {
    scripts: Mutex<VecDeque<FixtureScript>>,
    fallback: Mutex<Option<FixtureScript>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    logins: AtomicUsize,
}

/// Plays one script per opened session; the last script repeats once the
/// queue is drained.
#[derive(Debug, Clone, Default)]
pub struct FixtureDriver {
    state: Arc<FixtureState>,
}

impl FixtureDriver {
    pub fn new(scripts: impl IntoIterator<Item = FixtureScript>) -> Self {
        let driver = Self::default();
        for script in scripts {
            driver.push(script);
        }
        driver
    }

    /// Loads a JSON `RawTable` and serves it on every session.
    pub fn from_table_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading fixture table: {}", path.display()))?;
        let table: RawTable = serde_json::from_str(&data)
            .with_context(|| format!("invalid fixture table JSON: {}", path.display()))?;
        Ok(Self::new([FixtureScript::with_table(table)]))
    }

    pub fn push(&self, script: FixtureScript) {
        if let Ok(mut scripts) = self.state.scripts.lock() {
            scripts.push_back(script);
        }
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn peak_active(&self) -> usize {
        self.state.peak_active.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> FixtureScript {
        let next = self
            .state
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop_front());
        let Ok(mut fallback) = self.state.fallback.lock() else {
            return next.unwrap_or_else(|| FixtureScript::with_table(RawTable::default()));
        };
        match next {
            Some(script) => {
                *fallback = Some(script.clone());
                script
            }
            None => fallback
                .clone()
                .unwrap_or_else(|| FixtureScript::with_table(RawTable::default())),
        }
    }
}

#[async_trait]
impl SessionDriver for FixtureDriver {
    async fn open(&self) -> MonitorResult<Box<dyn PortalSession>> {
        let script = self.next_script();
        if let Some(message) = &script.open_error {
            return Err(MonitorError::connection(message));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FixtureSession {
            state: Arc::clone(&self.state),
            script,
            closed: false,
        }))
    }
}

struct FixtureSession {
    state: Arc<FixtureState>,
    script: FixtureScript,
    closed: bool,
}

#[async_trait]
impl PortalSession for FixtureSession {
    async fn login(&mut self, _student_id: &str, _password: &str) -> MonitorResult<LoginOutcome> {
        self.state.logins.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.login)
    }

    async fn select_term(&mut self, _label: &str) -> MonitorResult<bool> {
        Ok(self.script.term_available)
    }

    async fn extract_table(&mut self) -> MonitorResult<RawTable> {
        if !self.script.extract_delay.is_zero() {
            tokio::time::sleep(self.script.extract_delay).await;
        }
        self.script.table.clone().map_err(MonitorError::Extraction)
    }

    async fn close(&mut self) -> MonitorResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
