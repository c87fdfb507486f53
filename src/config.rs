use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PASSWORD_ENV: &str = "GRADE_WATCH_PASSWORD";
pub const EMAIL_PASSWORD_ENV: &str = "GRADE_WATCH_EMAIL_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub failure_policy: FailurePolicyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub password: String,
    /// Appended to the student id when filling the login form.
    #[serde(default = "default_login_suffix")]
    pub login_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_url")]
    pub url: String,
    #[serde(default)]
    pub term: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_success_markers")]
    pub success_markers: Vec<String>,
    /// Visible labels clicked in order to reach the grade page.
    #[serde(default = "default_menu_path")]
    pub menu_path: Vec<String>,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default)]
    pub selectors: SelectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorsConfig {
    #[serde(default = "default_username_input")]
    pub username_input: String,
    #[serde(default = "default_password_input")]
    pub password_input: String,
    #[serde(default = "default_login_button")]
    pub login_button: String,
    #[serde(default = "default_menu_item_class")]
    pub menu_item_class: String,
    #[serde(default = "default_term_arrow")]
    pub term_arrow: String,
    #[serde(default = "default_term_dropdown")]
    pub term_dropdown: String,
    #[serde(default = "default_grades_table_id")]
    pub grades_table_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts for term selection and table extraction within one session.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enable_stdout: bool,
    #[serde(default = "default_true")]
    pub enable_events: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
    #[serde(default)]
    pub email: EmailConfig,
}

/// SMTPS relay settings. The recipient defaults to the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub app_password: String,
    #[serde(default)]
    pub recipient: String,
}

impl EmailConfig {
    pub fn recipient_or_sender(&self) -> &str {
        let recipient = self.recipient.trim();
        if recipient.is_empty() {
            self.sender.trim()
        } else {
            recipient
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub student_id: Option<String>,
    pub term: Option<String>,
    pub interval_minutes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    Missing(&'static str),
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "{field} is required"),
            Self::Invalid { field, reason } => write!(f, "{field} is invalid: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid configuration: {}", render_issues(.0))]
pub struct ConfigErrors(pub Vec<ConfigIssue>);

fn render_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/grade-watch/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        let mut parsed = if path.exists() {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("failed reading config: {}", path.display()))?;
            toml::from_str::<Self>(&data)
                .with_context(|| format!("failed parsing TOML config: {}", path.display()))?
        } else {
            Self::default()
        };
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if !password.is_empty() {
                parsed.account.password = password;
            }
        }
        if let Ok(password) = std::env::var(EMAIL_PASSWORD_ENV) {
            if !password.is_empty() {
                parsed.alerts.email.app_password = password;
            }
        }
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(student_id) = overrides.student_id {
            self.account.student_id = student_id;
        }
        if let Some(term) = overrides.term {
            self.portal.term = term;
        }
        if let Some(interval) = overrides.interval_minutes {
            self.schedule.interval_minutes = interval;
        }
    }

    /// Checks every field once and reports all problems together.
    pub fn validate(self) -> std::result::Result<Self, ConfigErrors> {
        let mut issues = Vec::new();

        if self.account.student_id.trim().is_empty() {
            issues.push(ConfigIssue::Missing("account.student_id"));
        }
        if self.account.password.is_empty() {
            issues.push(ConfigIssue::Missing("account.password"));
        }
        if self.portal.term.trim().is_empty() {
            issues.push(ConfigIssue::Missing("portal.term"));
        }
        if !is_http_url(&self.portal.url) {
            issues.push(ConfigIssue::Invalid {
                field: "portal.url",
                reason: format!("expected http(s) URL, got {:?}", self.portal.url),
            });
        }
        if !is_http_url(&self.portal.webdriver_url) {
            issues.push(ConfigIssue::Invalid {
                field: "portal.webdriver_url",
                reason: format!("expected http(s) URL, got {:?}", self.portal.webdriver_url),
            });
        }
        if self.portal.success_markers.iter().all(|m| m.trim().is_empty()) {
            issues.push(ConfigIssue::Missing("portal.success_markers"));
        }
        if self.portal.selectors.grades_table_id.trim().is_empty() {
            issues.push(ConfigIssue::Missing("portal.selectors.grades_table_id"));
        }
        if self.schedule.interval_minutes == 0 {
            issues.push(ConfigIssue::Invalid {
                field: "schedule.interval_minutes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.storage.snapshot_path.trim().is_empty() {
            issues.push(ConfigIssue::Missing("storage.snapshot_path"));
        }
        if self.failure_policy.threshold == 0 {
            issues.push(ConfigIssue::Invalid {
                field: "failure_policy.threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.attempts == 0 {
            issues.push(ConfigIssue::Invalid {
                field: "retry.attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let webhook = self.alerts.webhook_url.trim();
        if !webhook.is_empty() && !is_http_url(webhook) {
            issues.push(ConfigIssue::Invalid {
                field: "alerts.webhook_url",
                reason: format!("expected http(s) URL, got {webhook:?}"),
            });
        }
        let token_set = !self.alerts.telegram_bot_token.trim().is_empty();
        let chat_set = !self.alerts.telegram_chat_id.trim().is_empty();
        if token_set && !chat_set {
            issues.push(ConfigIssue::Missing("alerts.telegram_chat_id"));
        }
        if chat_set && !token_set {
            issues.push(ConfigIssue::Missing("alerts.telegram_bot_token"));
        }
        let email = &self.alerts.email;
        if email.enabled {
            if email.smtp_host.trim().is_empty() {
                issues.push(ConfigIssue::Missing("alerts.email.smtp_host"));
            }
            if email.smtp_port == 0 {
                issues.push(ConfigIssue::Invalid {
                    field: "alerts.email.smtp_port",
                    reason: "must be a TCP port".to_string(),
                });
            }
            if email.sender.trim().is_empty() {
                issues.push(ConfigIssue::Missing("alerts.email.sender"));
            } else if let Err(e) = email.sender.trim().parse::<lettre::Address>() {
                issues.push(ConfigIssue::Invalid {
                    field: "alerts.email.sender",
                    reason: e.to_string(),
                });
            }
            if !email.recipient.trim().is_empty() {
                if let Err(e) = email.recipient.trim().parse::<lettre::Address>() {
                    issues.push(ConfigIssue::Invalid {
                        field: "alerts.email.recipient",
                        reason: e.to_string(),
                    });
                }
            }
            if email.app_password.is_empty() {
                issues.push(ConfigIssue::Missing("alerts.email.app_password"));
            }
        }

        if issues.is_empty() {
            Ok(self)
        } else {
            Err(ConfigErrors(issues))
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_snapshot_path(&self) -> PathBuf {
        expand_tilde(&self.storage.snapshot_path)
    }

    pub fn login_name(&self) -> String {
        format!("{}{}", self.account.student_id.trim(), self.account.login_suffix)
    }

    /// Copy safe to print or serve: passwords and tokens are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.account.password.is_empty() {
            copy.account.password = "********".to_string();
        }
        if !copy.alerts.telegram_bot_token.is_empty() {
            copy.alerts.telegram_bot_token = "********".to_string();
        }
        if !copy.alerts.email.app_password.is_empty() {
            copy.alerts.email.app_password = "********".to_string();
        }
        copy
    }

    pub fn default_template() -> String {
        let template = r#"[account]
student_id = ""
# Leave empty and export GRADE_WATCH_PASSWORD instead to keep it out of this file.
password = ""
login_suffix = "@stu.adu.edu.tr"

[portal]
url = "https://obisnet.adu.edu.tr/GIRIS?sw=OBIS&u=o"
term = "2024/2025 Güz"
webdriver_url = "http://localhost:9515"
headless = true
success_markers = ["Ders Kayıt İşlemleri", "Not Sınav İşlemleri"]
menu_path = ["Not Sınav İşlemleri", "Öğrenci Not Görüntüle"]
wait_timeout_secs = 20

[schedule]
interval_minutes = 20

[storage]
snapshot_path = "~/.local/share/grade-watch/grades.json"

[failure_policy]
enabled = true
threshold = 3

[retry]
attempts = 1
delay_secs = 5

[alerts]
enable_stdout = true
enable_events = true
webhook_url = ""
telegram_bot_token = ""
telegram_chat_id = ""

[alerts.email]
enabled = false
smtp_host = "smtp.gmail.com"
smtp_port = 465
sender = ""
# Gmail app password. GRADE_WATCH_EMAIL_PASSWORD overrides it.
app_password = ""
# Empty sends to the sender address.
recipient = ""
"#;
        template.to_string()
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: AccountConfig::default(),
            portal: PortalConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            failure_policy: FailurePolicyConfig::default(),
            retry: RetryConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            student_id: String::new(),
            password: String::new(),
            login_suffix: default_login_suffix(),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: default_portal_url(),
            term: String::new(),
            webdriver_url: default_webdriver_url(),
            headless: true,
            success_markers: default_success_markers(),
            menu_path: default_menu_path(),
            wait_timeout_secs: default_wait_timeout_secs(),
            selectors: SelectorsConfig::default(),
        }
    }
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        Self {
            username_input: default_username_input(),
            password_input: default_password_input(),
            login_button: default_login_button(),
            menu_item_class: default_menu_item_class(),
            term_arrow: default_term_arrow(),
            term_dropdown: default_term_dropdown(),
            grades_table_id: default_grades_table_id(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl Default for FailurePolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            enable_events: true,
            webhook_url: String::new(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            email: EmailConfig::default(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            sender: String::new(),
            app_password: String::new(),
            recipient: String::new(),
        }
    }
}

fn default_login_suffix() -> String {
    "@stu.adu.edu.tr".to_string()
}

fn default_portal_url() -> String {
    "https://obisnet.adu.edu.tr/GIRIS?sw=OBIS&u=o".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_success_markers() -> Vec<String> {
    vec![
        "Ders Kayıt İşlemleri".to_string(),
        "Not Sınav İşlemleri".to_string(),
    ]
}

fn default_menu_path() -> Vec<String> {
    vec![
        "Not Sınav İşlemleri".to_string(),
        "Öğrenci Not Görüntüle".to_string(),
    ]
}

fn default_wait_timeout_secs() -> u64 {
    20
}

fn default_username_input() -> String {
    r#"input[name="ctl00$ctl00$cphMain$cphContent$loginRecaptcha$UserName"]"#.to_string()
}

fn default_password_input() -> String {
    r#"input[name="ctl00$ctl00$cphMain$cphContent$loginRecaptcha$Password"]"#.to_string()
}

fn default_login_button() -> String {
    "#ctl00_ctl00_cphMain_cphContent_loginRecaptcha_btnGiris".to_string()
}

fn default_menu_item_class() -> String {
    "rtIn".to_string()
}

fn default_term_arrow() -> String {
    "#ctl00_ctl00_cphMain_cphContent_cmbDonem_Arrow".to_string()
}

fn default_term_dropdown() -> String {
    "#ctl00_ctl00_cphMain_cphContent_cmbDonem_DropDown".to_string()
}

fn default_grades_table_id() -> String {
    "ctl00_ctl00_cphMain_cphContent_rgridOgrenciDersNot_ctl00".to_string()
}

fn default_interval_minutes() -> u64 {
    20
}

fn default_snapshot_path() -> String {
    "~/.local/share/grade-watch/grades.json".to_string()
}

fn default_threshold() -> u32 {
    3
}

fn default_attempts() -> u32 {
    1
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_true() -> bool {
    true
}
