use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use tracing::debug;

use crate::config::EmailConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::monitor::events::{EventBus, MonitorEvent};
use crate::notify::{Notification, NotificationChannel};

const HTTP_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "grade-watch/0.1";
const SMTP_TIMEOUT_SECS: u64 = 20;

fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn channel_error(channel: &str, error: impl std::fmt::Display) -> MonitorError {
    MonitorError::Channel {
        channel: channel.to_string(),
        message: error.to_string(),
    }
}

pub struct StdoutChannel;

#[async_trait]
impl NotificationChannel for StdoutChannel {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        println!("[{}]\n{}\n", notification.title, notification.body);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookFlavor {
    Discord,
    Slack,
    Generic,
}

fn webhook_flavor(url: &str) -> WebhookFlavor {
    if url.contains("discord.com/api/webhooks") || url.contains("discordapp.com/api/webhooks") {
        WebhookFlavor::Discord
    } else if url.contains("hooks.slack.com") {
        WebhookFlavor::Slack
    } else {
        WebhookFlavor::Generic
    }
}

/// Posts to a Discord, Slack, or generic JSON webhook.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        let text = format!("**{}**\n{}", notification.title, notification.body);
        let req = match webhook_flavor(&self.url) {
            WebhookFlavor::Discord => self
                .client
                .post(&self.url)
                .json(&serde_json::json!({ "content": text })),
            WebhookFlavor::Slack => self
                .client
                .post(&self.url)
                .json(&serde_json::json!({ "text": text })),
            WebhookFlavor::Generic => self.client.post(&self.url).json(notification),
        };

        req.send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| channel_error(self.name(), e))?;
        debug!(channel = self.name(), title = %notification.title, "webhook delivered");
        Ok(())
    }
}

pub struct TelegramChannel {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let text = format!("{}\n\n{}", notification.title, notification.body);
        self.client
            .post(&url)
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            // reqwest errors embed the URL, which carries the bot token.
            .map_err(|e| channel_error(self.name(), e.without_url()))?;
        Ok(())
    }
}

/// Plain-text mail over an implicit-TLS SMTP relay (port 465 by default).
pub struct EmailChannel {
    from: Mailbox,
    to: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    pub fn from_config(config: &EmailConfig) -> MonitorResult<Self> {
        let sender = config.sender.trim();
        let from: Mailbox = sender
            .parse()
            .map_err(|e| channel_error("email", format!("invalid sender {sender:?}: {e}")))?;
        let recipient = config.recipient_or_sender();
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| channel_error("email", format!("invalid recipient {recipient:?}: {e}")))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(config.smtp_host.trim())
            .map_err(|e| channel_error("email", e))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                sender.to_string(),
                config.app_password.clone(),
            ))
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)))
            .build();
        Ok(Self { from, to, transport })
    }

    fn build_message(&self, notification: &Notification) -> MonitorResult<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification.title.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| channel_error("email", e))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        let message = self.build_message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| channel_error(self.name(), e))?;
        debug!(channel = self.name(), to = %self.to, "email delivered");
        Ok(())
    }
}

/// Hands notifications to in-process observers such as a tray UI.
pub struct EventChannel {
    bus: EventBus,
}

impl EventChannel {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationChannel for EventChannel {
    fn name(&self) -> &str {
        "events"
    }

    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        self.bus.emit(MonitorEvent::Notification {
            notification: notification.clone(),
        });
        Ok(())
    }
}
