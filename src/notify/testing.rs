use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{MonitorError, MonitorResult};
use crate::notify::{Notification, NotificationChannel};

/// In-memory channel that records what it was asked to send.
#[derive(Clone)]
pub struct RecordingChannel {
    name: String,
    fail: bool,
    attempts: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            attempts: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn handle(&self) -> Arc<dyn NotificationChannel> {
        Arc::new(self.clone())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("recording lock").clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MonitorError::Channel {
                channel: self.name.clone(),
                message: "simulated outage".to_string(),
            });
        }
        self.sent
            .lock()
            .expect("recording lock")
            .push(notification.clone());
        Ok(())
    }
}
