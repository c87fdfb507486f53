//! Access to the grade portal through a browser-automation engine.
//!
//! The monitor only talks to [`SessionDriver`] and [`PortalSession`]; the real
//! engine lives in [`webdriver`] and a scripted stand-in in [`fixture`].

pub mod fixture;
pub mod page;
pub mod webdriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MonitorResult;

pub use fixture::{FixtureDriver, FixtureScript};
pub use page::{classify_login_page, match_term, parse_grade_table};
pub use webdriver::WebDriverSessionDriver;

/// Cell text of the grade table, row by row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    Authenticated,
    /// Post-login page did not show any success marker.
    Rejected,
    /// Post-login page looked like a bot-detection challenge.
    Challenged,
}

impl LoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::Rejected => "credentials rejected or unexpected page",
            Self::Challenged => "bot-detection challenge shown",
        }
    }
}

#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Starts the automation engine. Fails with `MonitorError::Connection`.
    async fn open(&self) -> MonitorResult<Box<dyn PortalSession>>;
}

#[async_trait]
pub trait PortalSession: Send {
    async fn login(&mut self, student_id: &str, password: &str) -> MonitorResult<LoginOutcome>;

    /// Returns `Ok(false)` when no term option contains `label`.
    async fn select_term(&mut self, label: &str) -> MonitorResult<bool>;

    /// Fails with `MonitorError::Extraction` when the table is absent or empty.
    async fn extract_table(&mut self) -> MonitorResult<RawTable>;

    /// Releases the engine. Calling it again is a no-op.
    async fn close(&mut self) -> MonitorResult<()>;
}
