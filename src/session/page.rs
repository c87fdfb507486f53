use scraper::{Html, Selector};

use crate::error::{MonitorError, MonitorResult};
use crate::session::{LoginOutcome, RawTable};

const CHALLENGE_MARKERS: &[&str] = &["g-recaptcha", "h-captcha", "cf-challenge"];

/// Decides the login outcome from the post-login page source.
///
/// The portal's own login form embeds a captcha widget, so a page that still
/// shows the username input is a rejection even when a challenge marker is
/// present. Only a challenge page without the form counts as `Challenged`.
pub fn classify_login_page(
    html: &str,
    success_markers: &[String],
    login_form_css: &str,
) -> LoginOutcome {
    if success_markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .any(|marker| html.contains(marker.as_str()))
    {
        return LoginOutcome::Authenticated;
    }
    if shows_login_form(html, login_form_css) {
        return LoginOutcome::Rejected;
    }
    let lowered = html.to_lowercase();
    if CHALLENGE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        LoginOutcome::Challenged
    } else {
        LoginOutcome::Rejected
    }
}

fn shows_login_form(html: &str, login_form_css: &str) -> bool {
    // An unparsable selector cannot match, so the form counts as absent.
    let Ok(form) = Selector::parse(login_form_css) else {
        return false;
    };
    Html::parse_document(html).select(&form).next().is_some()
}

/// Index of the first visible choice containing `label`.
pub fn match_term(choices: &[String], label: &str) -> Option<usize> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    choices.iter().position(|choice| choice.contains(label))
}

pub fn parse_grade_table(html: &str, table_id: &str) -> MonitorResult<RawTable> {
    let document = Html::parse_document(html);
    let row_selector = selector(&format!("table[id=\"{table_id}\"] > tbody > tr"))?;
    let cell_selector = selector("td")?;

    let table_selector = selector(&format!("table[id=\"{table_id}\"]"))?;
    if document.select(&table_selector).next().is_none() {
        return Err(MonitorError::extraction(format!(
            "grade table #{table_id} not found"
        )));
    }

    let rows: Vec<Vec<String>> = document
        .select(&row_selector)
        .map(|row| {
            row.select(&cell_selector)
                .map(|cell| {
                    cell.text()
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect()
        })
        .collect();

    if rows.is_empty() {
        return Err(MonitorError::extraction(format!(
            "grade table #{table_id} has no rows"
        )));
    }
    Ok(RawTable { rows })
}

fn selector(css: &str) -> MonitorResult<Selector> {
    Selector::parse(css)
        .map_err(|e| MonitorError::extraction(format!("invalid selector {css}: {e}")))
}
