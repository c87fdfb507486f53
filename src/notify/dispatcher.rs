use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AlertsConfig;
use crate::grades::ChangeRecord;
use crate::monitor::events::EventBus;
use crate::notify::{
    change_notification, halted_notification, test_notification, EmailChannel, EventChannel,
    Notification, NotificationChannel, StdoutChannel, TelegramChannel, WebhookChannel,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Fans notifications out to every enabled channel. Each send is isolated:
/// a failing channel is logged and the remaining sends still happen.
#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn from_config(alerts: &AlertsConfig, bus: &EventBus) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        if alerts.enable_stdout {
            channels.push(Arc::new(StdoutChannel));
        }
        if alerts.enable_events {
            channels.push(Arc::new(EventChannel::new(bus.clone())));
        }
        if alerts.email.enabled {
            match EmailChannel::from_config(&alerts.email) {
                Ok(email) => channels.push(Arc::new(email)),
                Err(err) => warn!("email channel disabled: {err}"),
            }
        }
        if !alerts.webhook_url.trim().is_empty() {
            channels.push(Arc::new(WebhookChannel::new(alerts.webhook_url.trim())));
        }
        if !alerts.telegram_bot_token.trim().is_empty()
            && !alerts.telegram_chat_id.trim().is_empty()
        {
            channels.push(Arc::new(TelegramChannel::new(
                alerts.telegram_bot_token.trim(),
                alerts.telegram_chat_id.trim(),
            )));
        }
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub async fn notify(&self, changes: &[ChangeRecord]) -> DispatchReport {
        let mut report = DispatchReport::default();
        if changes.is_empty() {
            return report;
        }
        info!(
            changes = changes.len(),
            channels = self.channels.len(),
            "dispatching grade changes"
        );
        let now = Local::now();
        for channel in &self.channels {
            for change in changes {
                let notification = change_notification(change, now);
                let ok = self.deliver(channel.as_ref(), &notification).await;
                report.record(ok);
            }
        }
        report
    }

    pub async fn send_test(&self) -> DispatchReport {
        self.broadcast(&test_notification(Local::now())).await
    }

    pub async fn send_halted(&self, threshold: u32) -> DispatchReport {
        self.broadcast(&halted_notification(threshold, Local::now()))
            .await
    }

    pub async fn broadcast(&self, notification: &Notification) -> DispatchReport {
        let mut report = DispatchReport::default();
        for channel in &self.channels {
            let ok = self.deliver(channel.as_ref(), notification).await;
            report.record(ok);
        }
        report
    }

    async fn deliver(&self, channel: &dyn NotificationChannel, notification: &Notification) -> bool {
        match channel.send(notification).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    channel = channel.name(),
                    title = %notification.title,
                    "failed sending notification: {err}"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::CourseRecord;
    use crate::notify::testing::RecordingChannel;

    fn change(name: &str) -> ChangeRecord {
        ChangeRecord {
            course_name: name.to_string(),
            previous: None,
            current: CourseRecord::new(name, "-", "-", "-"),
        }
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let broken = RecordingChannel::failing("broken");
        let healthy = RecordingChannel::new("healthy");
        let dispatcher = Dispatcher::new(vec![broken.handle(), healthy.handle()]);

        let report = dispatcher
            .notify(&[change("Algorithms"), change("Databases")])
            .await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(broken.attempts(), 2);
        let titles: Vec<_> = healthy.sent().into_iter().map(|n| n.title).collect();
        assert_eq!(
            titles,
            vec!["Grade update: Algorithms", "Grade update: Databases"]
        );
    }

    #[tokio::test]
    async fn no_changes_sends_nothing() {
        let channel = RecordingChannel::new("only");
        let dispatcher = Dispatcher::new(vec![channel.handle()]);
        let report = dispatcher.notify(&[]).await;
        assert_eq!(report, DispatchReport::default());
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_and_halted_messages_go_once_per_channel() {
        let a = RecordingChannel::new("a");
        let b = RecordingChannel::new("b");
        let dispatcher = Dispatcher::new(vec![a.handle(), b.handle()]);

        assert_eq!(dispatcher.send_test().await.delivered, 2);
        assert_eq!(dispatcher.send_halted(3).await.delivered, 2);

        assert_eq!(a.sent().len(), 2);
        assert_eq!(b.sent().len(), 2);
        assert_eq!(a.sent()[1].title, "Grade monitor halted");
    }

    #[test]
    fn config_builds_enabled_channels() {
        let bus = EventBus::new();
        let mut alerts = AlertsConfig::default();
        alerts.webhook_url = "https://discord.com/api/webhooks/1/x".to_string();
        alerts.telegram_bot_token = "token".to_string();
        let dispatcher = Dispatcher::from_config(&alerts, &bus);
        assert_eq!(
            dispatcher.channel_names(),
            vec!["stdout", "events", "webhook"]
        );
    }

    #[tokio::test]
    async fn config_adds_email_when_enabled() {
        let bus = EventBus::new();
        let mut alerts = AlertsConfig::default();
        alerts.enable_stdout = false;
        alerts.email.enabled = true;
        alerts.email.sender = "student@gmail.com".to_string();
        alerts.email.app_password = "abcd efgh".to_string();
        let dispatcher = Dispatcher::from_config(&alerts, &bus);
        assert_eq!(dispatcher.channel_names(), vec!["events", "email"]);
    }
}
