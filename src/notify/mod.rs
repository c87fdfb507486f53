pub mod channels;
pub mod dispatcher;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::MonitorResult;
use crate::grades::{ChangeKind, ChangeRecord};

pub use channels::{EmailChannel, EventChannel, StdoutChannel, TelegramChannel, WebhookChannel};
pub use dispatcher::{DispatchReport, Dispatcher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> MonitorResult<()>;
}

const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

pub fn change_notification(change: &ChangeRecord, now: DateTime<Local>) -> Notification {
    let marker = match change.kind() {
        ChangeKind::Updated => "Updated",
        ChangeKind::New => "New",
    };
    let current = &change.current;
    let body = format!(
        "{name}\n\n{marker}:\n- Exams: {exams}\n- Letter grade: {letter}\n- Result: {result}\n\n{stamp}",
        name = change.course_name,
        exams = current.exam_summary,
        letter = current.letter_grade,
        result = current.result,
        stamp = now.format(TIMESTAMP_FORMAT),
    );
    Notification {
        title: format!("Grade update: {}", change.course_name),
        body,
    }
}

pub fn halted_notification(threshold: u32, now: DateTime<Local>) -> Notification {
    Notification {
        title: "Grade monitor halted".to_string(),
        body: format!(
            "Login to the grade portal failed {threshold} times in a row, so monitoring has stopped.\n\
             Check the account credentials and restart the monitor.\n\n{}",
            now.format(TIMESTAMP_FORMAT)
        ),
    }
}

pub fn test_notification(now: DateTime<Local>) -> Notification {
    Notification {
        title: "Grade monitor test".to_string(),
        body: format!(
            "This is a test notification. The channel is configured correctly.\n\n{}",
            now.format(TIMESTAMP_FORMAT)
        ),
    }
}
