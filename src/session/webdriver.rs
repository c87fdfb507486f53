use std::time::Duration;

use async_trait::async_trait;
use thirtyfour::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::session::page::{classify_login_page, match_term, parse_grade_table};
use crate::session::{LoginOutcome, PortalSession, RawTable, SessionDriver};

const POLL_INTERVAL_MS: u64 = 250;
const SETTLE_DELAY_MS: u64 = 1500;

/// Opens ChromeDriver-backed sessions against the configured portal.
#[derive(Debug, Clone)]
pub struct WebDriverSessionDriver {
    portal: PortalConfig,
    login_suffix: String,
}

impl WebDriverSessionDriver {
    pub fn new(portal: PortalConfig, login_suffix: impl Into<String>) -> Self {
        Self {
            portal,
            login_suffix: login_suffix.into(),
        }
    }
}

#[async_trait]
impl SessionDriver for WebDriverSessionDriver {
    async fn open(&self) -> MonitorResult<Box<dyn PortalSession>> {
        let mut caps = DesiredCapabilities::chrome();
        let mut args = vec![
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--window-size=1280,720",
            "--disable-blink-features=AutomationControlled",
        ];
        if self.portal.headless {
            args.push("--headless=new");
        }
        caps.add_chrome_option("args", args)
            .map_err(MonitorError::connection)?;

        let driver = WebDriver::new(self.portal.webdriver_url.as_str(), caps)
            .await
            .map_err(|e| {
                MonitorError::connection(format!(
                    "failed to connect to WebDriver at {}: {e}",
                    self.portal.webdriver_url
                ))
            })?;
        info!(webdriver = %self.portal.webdriver_url, "browser session opened");

        Ok(Box::new(WebDriverSession {
            driver: Some(driver),
            portal: self.portal.clone(),
            login_suffix: self.login_suffix.clone(),
        }))
    }
}

pub struct WebDriverSession {
    driver: Option<WebDriver>,
    portal: PortalConfig,
    login_suffix: String,
}

impl WebDriverSession {
    fn driver(&self) -> MonitorResult<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| MonitorError::connection("browser session already closed"))
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.portal.wait_timeout_secs.max(1))
    }

    async fn wait_for(&self, by: By) -> WebDriverResult<WebElement> {
        self.driver()
            .map_err(|e| WebDriverError::CustomError(e.to_string()))?
            .query(by)
            .wait(self.wait_timeout(), Duration::from_millis(POLL_INTERVAL_MS))
            .first()
            .await
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(SETTLE_DELAY_MS)).await;
    }

    async fn submit_credentials(&self, login_name: &str, password: &str) -> WebDriverResult<String> {
        let selectors = &self.portal.selectors;
        let driver = self
            .driver()
            .map_err(|e| WebDriverError::CustomError(e.to_string()))?;
        driver.goto(self.portal.url.as_str()).await?;

        self.wait_for(By::Css(selectors.username_input.as_str()))
            .await?
            .send_keys(login_name)
            .await?;
        self.wait_for(By::Css(selectors.password_input.as_str()))
            .await?
            .send_keys(password)
            .await?;
        self.wait_for(By::Css(selectors.login_button.as_str()))
            .await?
            .click()
            .await?;

        self.settle().await;
        driver.source().await
    }

    async fn open_term_choices(&self) -> WebDriverResult<Vec<WebElement>> {
        let selectors = &self.portal.selectors;
        for label in &self.portal.menu_path {
            let xpath = menu_item_xpath(&selectors.menu_item_class, label);
            debug!(label = %label, "opening menu item");
            self.wait_for(By::XPath(xpath.as_str())).await?.click().await?;
        }

        self.wait_for(By::Css(selectors.term_arrow.as_str()))
            .await?
            .click()
            .await?;
        let dropdown = self.wait_for(By::Css(selectors.term_dropdown.as_str())).await?;
        dropdown.find_all(By::Tag("li")).await
    }
}

#[async_trait]
impl PortalSession for WebDriverSession {
    async fn login(&mut self, student_id: &str, password: &str) -> MonitorResult<LoginOutcome> {
        let login_name = format!("{}{}", student_id.trim(), self.login_suffix);
        let source = self
            .submit_credentials(&login_name, password)
            .await
            .map_err(|e| MonitorError::Login(e.to_string()))?;
        Ok(classify_login_page(
            &source,
            &self.portal.success_markers,
            &self.portal.selectors.username_input,
        ))
    }

    async fn select_term(&mut self, label: &str) -> MonitorResult<bool> {
        let items = self
            .open_term_choices()
            .await
            .map_err(MonitorError::navigation)?;

        let mut choices = Vec::with_capacity(items.len());
        for item in &items {
            choices.push(item.text().await.map_err(MonitorError::navigation)?);
        }
        let Some(index) = match_term(&choices, label) else {
            warn!(term = %label, available = ?choices, "term not offered by portal");
            return Ok(false);
        };

        items[index].click().await.map_err(MonitorError::navigation)?;
        self.settle().await;
        let table_css = format!("#{}", self.portal.selectors.grades_table_id);
        self.wait_for(By::Css(table_css.as_str()))
            .await
            .map_err(MonitorError::navigation)?;
        Ok(true)
    }

    async fn extract_table(&mut self) -> MonitorResult<RawTable> {
        let source = self
            .driver()?
            .source()
            .await
            .map_err(MonitorError::extraction)?;
        parse_grade_table(&source, &self.portal.selectors.grades_table_id)
    }

    async fn close(&mut self) -> MonitorResult<()> {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };
        driver.quit().await.map_err(MonitorError::connection)?;
        info!("browser session closed");
        Ok(())
    }
}

fn menu_item_xpath(class: &str, label: &str) -> String {
    format!(
        "//*[contains(concat(' ', normalize-space(@class), ' '), ' {class} ')][contains(normalize-space(.), {})]",
        xpath_literal(label)
    )
}

/// Quotes `value` for use inside an XPath expression.
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("Grades"), "'Grades'");
        assert_eq!(xpath_literal("Student's"), "\"Student's\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn menu_xpath_matches_class_token_and_label() {
        let xpath = menu_item_xpath("rtIn", "Öğrenci Not Görüntüle");
        assert!(xpath.contains("' rtIn '"));
        assert!(xpath.contains("'Öğrenci Not Görüntüle'"));
    }
}
