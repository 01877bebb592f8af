//! Mock email provider for testing

use super::{EmailProvider, HealthTracker, ProviderKind, ProviderLimits, ProviderStats};
use crate::error::{NotificationError, NotificationResult};
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock provider that captures sent messages and can be scripted to fail.
pub struct MockEmailProvider {
    name: String,
    priority: i32,
    bulk: bool,
    max_batch_size: usize,
    health: HealthTracker,
    failing: AtomicBool,
    failure_message: String,
    failing_recipients: HashSet<String>,
    panicking_recipients: HashSet<String>,
    delay: Option<Duration>,
    sent: Arc<Mutex<Vec<Message>>>,
    bulk_sent: Arc<Mutex<Vec<BulkMessage>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEmailProvider {
    /// Create a healthy single-send mock
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 1,
            bulk: false,
            max_batch_size: 1,
            health: HealthTracker::new(1000),
            failing: AtomicBool::new(false),
            failure_message: "Mock failure".to_string(),
            failing_recipients: HashSet::new(),
            panicking_recipients: HashSet::new(),
            delay: None,
            sent: Arc::new(Mutex::new(Vec::new())),
            bulk_sent: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a mock that fails every send with `message`
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut provider = Self::new(name);
        provider.failure_message = message.into();
        provider.failing = AtomicBool::new(true);
        provider
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Advertise native bulk support
    pub fn with_bulk(mut self, max_batch_size: usize) -> Self {
        self.bulk = true;
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_hourly_limit(mut self, max_per_hour: u32) -> Self {
        self.health = HealthTracker::new(max_per_hour);
        self
    }

    /// Pretend `count` emails were already sent this hour
    pub fn with_sent(self, count: u32) -> Self {
        self.health.record_success(count);
        self
    }

    /// Start out unhealthy
    pub fn unhealthy(self) -> Self {
        self.health.record_failure(0, "marked unhealthy");
        self
    }

    /// Fail only sends addressed to `recipient`
    pub fn failing_for(mut self, recipient: impl Into<String>) -> Self {
        self.failing_recipients.insert(recipient.into());
        self
    }

    /// Panic inside sends addressed to `recipient`
    pub fn panicking_for(mut self, recipient: impl Into<String>) -> Self {
        self.panicking_recipients.insert(recipient.into());
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Toggle failure of every send
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Individually sent messages
    pub async fn sent_emails(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Bulk calls received
    pub async fn bulk_calls(&self) -> Vec<BulkMessage> {
        self.bulk_sent.lock().await.clone()
    }

    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent.lock().await.iter().any(|m| m.to == email)
    }

    /// Highest number of concurrent calls observed
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    async fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(current, Ordering::AcqRel);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    fn should_fail(&self, recipients: &[&str]) -> bool {
        self.failing.load(Ordering::Acquire)
            || recipients
                .iter()
                .any(|r| self.failing_recipients.contains(*r))
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send_email(&self, message: &Message) -> NotificationResult<()> {
        if self.panicking_recipients.contains(&message.to) {
            panic!("mock provider panicked sending to {}", message.to);
        }
        self.enter().await;
        let result = if self.should_fail(&[message.to.as_str()]) {
            Err(NotificationError::Send(self.failure_message.clone()))
        } else {
            self.sent.lock().await.push(message.clone());
            Ok(())
        };
        self.leave();
        self.health.track(1, result)
    }

    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()> {
        self.enter().await;
        let recipients: Vec<&str> = message.to.iter().map(String::as_str).collect();
        let result = if self.should_fail(&recipients) {
            Err(NotificationError::Send(self.failure_message.clone()))
        } else {
            self.bulk_sent.lock().await.push(message.clone());
            Ok(())
        };
        self.leave();
        self.health.track(message.to.len() as u32, result)
    }

    fn supports_bulk(&self) -> bool {
        self.bulk
    }

    fn limits(&self) -> ProviderLimits {
        ProviderLimits {
            max_emails_per_hour: self.health.max_per_hour(),
            max_batch_size: self.max_batch_size,
            supports_bulk: self.bulk,
        }
    }

    fn stats(&self) -> ProviderStats {
        self.health.stats()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        if self.bulk {
            ProviderKind::Api
        } else {
            ProviderKind::Smtp
        }
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn validate_config(&self) -> NotificationResult<()> {
        Ok(())
    }
}
