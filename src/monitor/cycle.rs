use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::MonitorError;
use crate::grades::{
    diff_courses, normalize_rows, ChangeRecord, CourseRecord, DiffSummary, Snapshot,
};
use crate::monitor::breaker::{BreakerDecision, FailurePolicy};
use crate::monitor::events::{EventBus, MonitorEvent};
use crate::notify::{DispatchReport, Dispatcher};
use crate::session::{PortalSession, RawTable, SessionDriver};
use crate::snapshot::SnapshotStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Success,
    /// The automation engine could not be started. Does not count as a login failure.
    ConnectionFailed,
    LoginFailed,
    NavigationFailed,
    ExtractionFailed,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    SessionOpening,
    Authenticating,
    Navigating,
    Extracting,
    Diffing,
    Notifying,
    Persisting,
    Failed(CycleOutcome),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CycleResult {
    pub cycle: u64,
    pub outcome: CycleOutcome,
    pub change_count: usize,
    pub changes: Vec<ChangeRecord>,
    pub summary: Option<DiffSummary>,
    pub detail: Option<String>,
    pub dispatch: Option<DispatchReport>,
    /// Set when this cycle tripped the failure policy.
    pub halted: bool,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub student_id: String,
    pub password: String,
    pub term: String,
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            student_id: config.account.student_id.clone(),
            password: config.account.password.clone(),
            term: config.portal.term.clone(),
            attempts: config.retry.attempts.max(1),
            retry_delay: Duration::from_secs(config.retry.delay_secs),
        }
    }
}

struct CycleFailure {
    outcome: CycleOutcome,
    error: MonitorError,
}

impl CycleFailure {
    fn new(outcome: CycleOutcome, error: MonitorError) -> Self {
        Self { outcome, error }
    }
}

/// Runs one complete check: session, extraction, diff, notification, persistence.
pub struct CycleOrchestrator {
    driver: Arc<dyn SessionDriver>,
    store: SnapshotStore,
    dispatcher: Dispatcher,
    policy: Arc<FailurePolicy>,
    bus: EventBus,
    settings: CycleSettings,
    cycles: AtomicU64,
}

impl CycleOrchestrator {
    pub fn new(
        driver: Arc<dyn SessionDriver>,
        store: SnapshotStore,
        dispatcher: Dispatcher,
        policy: Arc<FailurePolicy>,
        bus: EventBus,
        settings: CycleSettings,
    ) -> Self {
        Self {
            driver,
            store,
            dispatcher,
            policy,
            bus,
            settings,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &Arc<FailurePolicy> {
        &self.policy
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub async fn run_cycle(&self) -> CycleResult {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.execute(cycle)
            .instrument(info_span!("cycle", n = cycle))
            .await
    }

    async fn execute(&self, cycle: u64) -> CycleResult {
        info!("starting grade check");

        self.enter(cycle, CyclePhase::SessionOpening);
        let mut session = match self.driver.open().await {
            Ok(session) => session,
            Err(error) => {
                return self
                    .fail(cycle, CycleFailure::new(CycleOutcome::ConnectionFailed, error))
                    .await
            }
        };

        let collected = self.collect(cycle, session.as_mut()).await;
        if let Err(error) = session.close().await {
            warn!("failed closing browser session: {error}");
        }

        let courses = match collected {
            Ok(courses) => courses,
            Err(failure) => return self.fail(cycle, failure).await,
        };

        self.enter(cycle, CyclePhase::Diffing);
        let previous = match self.store.load() {
            Ok(previous) => previous,
            Err(error) => {
                warn!("previous snapshot unusable, treating as first check: {error}");
                None
            }
        };
        let (changes, summary) = diff_courses(previous.as_ref(), &courses);
        info!(
            courses = courses.len(),
            changes = changes.len(),
            summary = %summary,
            "grades compared"
        );

        let dispatch = if changes.is_empty() {
            None
        } else {
            self.enter(cycle, CyclePhase::Notifying);
            Some(self.dispatcher.notify(&changes).await)
        };

        self.enter(cycle, CyclePhase::Persisting);
        if let Err(error) = self.store.save(&Snapshot::new(courses)) {
            error!("failed saving snapshot: {error}");
        }

        let result = CycleResult {
            cycle,
            outcome: CycleOutcome::Success,
            change_count: changes.len(),
            changes,
            summary: Some(summary),
            detail: None,
            dispatch,
            halted: false,
            finished_at: Utc::now(),
        };
        self.enter(cycle, CyclePhase::Idle);
        self.report(result)
    }

    /// Session steps up to a normalized course list. Closing is the caller's job.
    async fn collect(
        &self,
        cycle: u64,
        session: &mut dyn PortalSession,
    ) -> Result<Vec<CourseRecord>, CycleFailure> {
        self.enter(cycle, CyclePhase::Authenticating);
        match session
            .login(&self.settings.student_id, &self.settings.password)
            .await
        {
            Ok(outcome) if outcome.is_authenticated() => {
                self.policy.record_login_success();
                info!("logged in");
            }
            Ok(outcome) => {
                return Err(CycleFailure::new(
                    CycleOutcome::LoginFailed,
                    MonitorError::Login(outcome.describe().to_string()),
                ))
            }
            Err(error) => return Err(CycleFailure::new(CycleOutcome::LoginFailed, error)),
        }

        self.enter(cycle, CyclePhase::Navigating);
        self.navigate(session)
            .await
            .map_err(|error| CycleFailure::new(CycleOutcome::NavigationFailed, error))?;

        self.enter(cycle, CyclePhase::Extracting);
        let table = self
            .extract(session)
            .await
            .map_err(|error| CycleFailure::new(CycleOutcome::ExtractionFailed, error))?;

        let courses = normalize_rows(&table);
        if courses.is_empty() {
            info!(rows = table.rows.len(), "grade table has no courses this term");
        }
        Ok(courses)
    }

    async fn navigate(&self, session: &mut dyn PortalSession) -> Result<(), MonitorError> {
        let term = self.settings.term.as_str();
        let mut attempt = 1;
        loop {
            let error = match session.select_term(term).await {
                Ok(true) => return Ok(()),
                Ok(false) => MonitorError::Navigation(format!("term {term:?} not offered")),
                Err(error) => error,
            };
            if attempt >= self.settings.attempts {
                return Err(error);
            }
            warn!(attempt, "term selection failed, retrying: {error}");
            attempt += 1;
            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }

    async fn extract(&self, session: &mut dyn PortalSession) -> Result<RawTable, MonitorError> {
        let mut attempt = 1;
        loop {
            match session.extract_table().await {
                Ok(table) => return Ok(table),
                Err(error) if attempt >= self.settings.attempts => return Err(error),
                Err(error) => {
                    warn!(attempt, "grade extraction failed, retrying: {error}");
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    async fn fail(&self, cycle: u64, failure: CycleFailure) -> CycleResult {
        let CycleFailure { outcome, error } = failure;
        error!(outcome = ?outcome, "grade check failed: {error}");
        self.enter(cycle, CyclePhase::Failed(outcome));

        let mut halted = false;
        if outcome == CycleOutcome::LoginFailed {
            let decision = self.policy.record_login_failure();
            warn!(
                consecutive_failures = self.policy.consecutive_failures(),
                threshold = self.policy.threshold(),
                "login failure recorded"
            );
            if decision == BreakerDecision::Trip {
                halted = true;
            }
        }

        let result = self.report(CycleResult {
            cycle,
            outcome,
            change_count: 0,
            changes: Vec::new(),
            summary: None,
            detail: Some(error.to_string()),
            dispatch: None,
            halted,
            finished_at: Utc::now(),
        });

        if halted {
            self.halt().await;
        }
        result
    }

    async fn halt(&self) {
        let failures = self.policy.consecutive_failures();
        error!(
            consecutive_failures = failures,
            "too many consecutive login failures, halting monitor"
        );
        self.dispatcher.send_halted(self.policy.threshold()).await;
        self.bus.emit(MonitorEvent::Halted {
            consecutive_failures: failures,
        });
        self.bus.status(format!(
            "Monitoring halted after {failures} failed logins"
        ));
    }

    fn report(&self, result: CycleResult) -> CycleResult {
        let label = if result.outcome.is_success() {
            "success"
        } else {
            "failed"
        };
        self.bus
            .status(format!("Last check: {} ({label})", Local::now().format("%H:%M")));
        self.bus.emit(MonitorEvent::CycleFinished {
            cycle: result.cycle,
            result: result.clone(),
        });
        result
    }

    fn enter(&self, cycle: u64, phase: CyclePhase) {
        self.bus.emit(MonitorEvent::Phase { cycle, phase });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grades::CourseRecord;
    use crate::monitor::breaker::BreakerState;
    use crate::notify::testing::RecordingChannel;
    use crate::session::{FixtureDriver, FixtureScript};

    pub(crate) fn settings() -> CycleSettings {
        CycleSettings {
            student_id: "201001".to_string(),
            password: "secret".to_string(),
            term: "2024/2025 Güz".to_string(),
            attempts: 1,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub(crate) fn table(rows: &[[&str; 5]]) -> RawTable {
        RawTable {
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    pub(crate) struct Harness {
        pub driver: FixtureDriver,
        pub channels: Vec<RecordingChannel>,
        pub store: SnapshotStore,
        pub bus: EventBus,
        pub orchestrator: Arc<CycleOrchestrator>,
        _dir: tempfile::TempDir,
    }

    pub(crate) fn harness(scripts: Vec<FixtureScript>, threshold: u32) -> Harness {
        harness_with(scripts, threshold, settings())
    }

    pub(crate) fn harness_with(
        scripts: Vec<FixtureScript>,
        threshold: u32,
        settings: CycleSettings,
    ) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("grades.json"));
        let driver = FixtureDriver::new(scripts);
        let channels = vec![RecordingChannel::new("first"), RecordingChannel::new("second")];
        let dispatcher = Dispatcher::new(channels.iter().map(RecordingChannel::handle).collect());
        let bus = EventBus::new();
        let orchestrator = Arc::new(CycleOrchestrator::new(
            Arc::new(driver.clone()),
            store.clone(),
            dispatcher,
            Arc::new(FailurePolicy::new(threshold, true)),
            bus.clone(),
            settings,
        ));
        Harness {
            driver,
            channels,
            store,
            bus,
            orchestrator,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn end_to_end_reports_updated_and_new_courses() {
        let h = harness(
            vec![FixtureScript::with_table(table(&[
                ["Algorithms", "70", "BA", "3", "Passed"],
                ["Databases", "-", "-", "4", "-"],
            ]))],
            3,
        );
        h.store
            .save(&Snapshot::new(vec![CourseRecord::new("Algorithms", "70", "-", "-")]))
            .expect("seed snapshot");

        let result = h.orchestrator.run_cycle().await;

        assert_eq!(result.outcome, CycleOutcome::Success);
        assert_eq!(result.change_count, 2);
        assert_eq!(result.summary, Some(DiffSummary::ChangesFound));
        for channel in &h.channels {
            let sent = channel.sent();
            assert_eq!(sent.len(), 2);
            assert!(sent[0].body.contains("Updated:"));
            assert!(sent[0].body.contains("- Letter grade: BA"));
            assert!(sent[1].title.contains("Databases"));
            assert!(sent[1].body.contains("New:"));
        }
        let stored = h.store.load().expect("load").expect("snapshot");
        assert_eq!(stored.courses.len(), 2);
        assert_eq!(h.driver.closed(), 1);
    }

    #[tokio::test]
    async fn unchanged_grades_send_nothing() {
        let rows = table(&[["Algorithms", "70", "BA", "3", "Passed"]]);
        let h = harness(vec![FixtureScript::with_table(rows)], 3);

        let first = h.orchestrator.run_cycle().await;
        assert_eq!(first.summary, Some(DiffSummary::FirstCheck));
        let second = h.orchestrator.run_cycle().await;
        assert_eq!(second.summary, Some(DiffSummary::NoChanges));
        assert_eq!(second.change_count, 0);
        assert_eq!(h.channels[0].sent().len(), 1);
        assert_eq!(h.driver.opened(), 2);
        assert_eq!(h.driver.closed(), 2);
    }

    #[tokio::test]
    async fn open_failure_does_not_feed_breaker() {
        let h = harness(vec![FixtureScript::open_fails("chromedriver not running")], 1);
        let result = h.orchestrator.run_cycle().await;
        assert_eq!(result.outcome, CycleOutcome::ConnectionFailed);
        assert!(!result.halted);
        assert_eq!(h.orchestrator.policy().consecutive_failures(), 0);
        assert_eq!(h.driver.opened(), 0);
        assert_eq!(h.driver.closed(), 0);
    }

    #[tokio::test]
    async fn every_failure_path_closes_the_session_once() {
        let h = harness(
            vec![
                FixtureScript::login_rejected(),
                FixtureScript::term_missing(),
                FixtureScript::extraction_fails("table missing"),
            ],
            5,
        );
        let outcomes = [
            h.orchestrator.run_cycle().await.outcome,
            h.orchestrator.run_cycle().await.outcome,
            h.orchestrator.run_cycle().await.outcome,
        ];
        assert_eq!(
            outcomes,
            [
                CycleOutcome::LoginFailed,
                CycleOutcome::NavigationFailed,
                CycleOutcome::ExtractionFailed
            ]
        );
        assert_eq!(h.driver.opened(), 3);
        assert_eq!(h.driver.closed(), 3);
        // Navigation and extraction failures follow a successful login.
        assert_eq!(h.orchestrator.policy().consecutive_failures(), 0);
        assert!(h.store.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn third_login_failure_halts_with_one_notification() {
        let h = harness(vec![FixtureScript::login_rejected()], 3);
        let results = [
            h.orchestrator.run_cycle().await,
            h.orchestrator.run_cycle().await,
            h.orchestrator.run_cycle().await,
        ];
        assert!(!results[0].halted);
        assert!(!results[1].halted);
        assert!(results[2].halted);
        assert_eq!(
            h.orchestrator.policy().snapshot().state,
            BreakerState::Tripped
        );
        for channel in &h.channels {
            let sent = channel.sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].title, "Grade monitor halted");
        }
    }

    #[tokio::test]
    async fn login_success_resets_before_fourth_failure() {
        let h = harness(
            vec![
                FixtureScript::login_rejected(),
                FixtureScript::login_rejected(),
                FixtureScript::term_missing(),
                FixtureScript::login_rejected(),
            ],
            3,
        );
        for _ in 0..3 {
            h.orchestrator.run_cycle().await;
        }
        assert_eq!(h.orchestrator.policy().consecutive_failures(), 0);
        let fourth = h.orchestrator.run_cycle().await;
        assert_eq!(fourth.outcome, CycleOutcome::LoginFailed);
        assert!(!fourth.halted);
        assert_eq!(h.orchestrator.policy().consecutive_failures(), 1);
        assert!(h.channels[0].sent().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_degrades_to_first_check() {
        let h = harness(
            vec![FixtureScript::with_table(table(&[[
                "Algorithms", "70", "BA", "3", "Passed",
            ]]))],
            3,
        );
        std::fs::write(h.store.path(), "not json").expect("corrupt snapshot");

        let result = h.orchestrator.run_cycle().await;
        assert_eq!(result.outcome, CycleOutcome::Success);
        assert_eq!(result.summary, Some(DiffSummary::FirstCheck));
        assert!(h.store.load().expect("load repaired").is_some());
    }

    #[tokio::test]
    async fn empty_course_list_is_a_successful_check() {
        let h = harness(
            vec![FixtureScript::with_table(RawTable {
                rows: vec![vec!["No grades published".to_string()]],
            })],
            3,
        );
        let result = h.orchestrator.run_cycle().await;
        assert_eq!(result.outcome, CycleOutcome::Success);
        assert_eq!(result.change_count, 0);
        let stored = h.store.load().expect("load").expect("snapshot saved");
        assert!(stored.courses.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_navigation_without_logging_in_again() {
        let mut custom = settings();
        custom.attempts = 3;
        let h = harness_with(vec![FixtureScript::term_missing()], 3, custom);
        let result = h.orchestrator.run_cycle().await;
        assert_eq!(result.outcome, CycleOutcome::NavigationFailed);
        assert_eq!(h.driver.logins(), 1);
        assert_eq!(h.driver.closed(), 1);
    }

    #[tokio::test]
    async fn status_line_reports_outcome() {
        let h = harness(vec![FixtureScript::login_rejected()], 3);
        let mut rx = h.bus.subscribe();
        h.orchestrator.run_cycle().await;

        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let MonitorEvent::Status { line } = event {
                lines.push(line);
            }
        }
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Last check: "));
        assert!(lines[0].ends_with("(failed)"));
    }
}
