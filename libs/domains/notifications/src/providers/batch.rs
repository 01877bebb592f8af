//! Async batching for providers without native bulk support.
//!
//! [`BatchedProvider`] accepts messages into an accumulator and hands them to
//! the wrapped provider when the batch reaches its size or when the batch
//! timeout elapses, whichever comes first. A background task owns the timer;
//! [`EmailProvider::shutdown`] stops it and flushes whatever is left.
//!
//! The accumulator never holds more than `batch_size` messages. The producer
//! whose message fills it seals the batch under the lock and waits for its
//! delivery before enqueueing anything else, so a slow flush pushes back on
//! producers instead of growing the next batch.

use super::{EmailProvider, ProviderKind, ProviderLimits, ProviderStats};
use crate::config::DispatchConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Size, timeout and fan-out of one batch accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub timeout: Duration,
    /// Concurrent single sends when the wrapped provider has no bulk path.
    pub concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for BatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            batch_size: config.smtp_batch_size,
            timeout: config.batch_timeout(),
            concurrency: config.batch_concurrency,
        }
    }
}

impl BatchSettings {
    /// Settings for `provider`: SMTP uses the configured SMTP batch size, API
    /// providers use their own max batch size.
    pub fn for_provider(provider: &dyn EmailProvider, config: &DispatchConfig) -> Self {
        let mut settings = Self::from(config);
        if provider.kind() == ProviderKind::Api && provider.limits().max_batch_size > 0 {
            settings.batch_size = provider.limits().max_batch_size;
        }
        settings
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

struct BatchState {
    inner: Arc<dyn EmailProvider>,
    settings: BatchSettings,
    batch: Mutex<Vec<Message>>,
}

impl BatchState {
    async fn enqueue(self: &Arc<Self>, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            let sealed = {
                let mut batch = self.batch.lock().await;
                batch.push(message);
                if batch.len() >= self.settings.batch_size {
                    Some(std::mem::replace(
                        &mut *batch,
                        Vec::with_capacity(self.settings.batch_size),
                    ))
                } else {
                    None
                }
            };

            if let Some(sealed) = sealed {
                // Delivered on its own task so a caller that gives up waiting
                // does not drop the sealed batch.
                let state = Arc::clone(self);
                let delivery = tokio::spawn(async move { state.deliver(sealed).await });
                match delivery.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(provider = %self.inner.name(), error = %e, "Batch processing error")
                    }
                    Err(e) => error!(provider = %self.inner.name(), error = %e, "Batch task panicked"),
                }
            }
        }
    }

    async fn flush(&self) -> NotificationResult<()> {
        let batch = std::mem::take(&mut *self.batch.lock().await);
        self.deliver(batch).await
    }

    async fn deliver(&self, batch: Vec<Message>) -> NotificationResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let total = batch.len();
        debug!(provider = %self.inner.name(), total, "Flushing batch");

        let failed = if self.inner.supports_bulk() {
            self.send_grouped(batch).await
        } else {
            self.send_each(batch).await
        };

        if failed > 0 {
            return Err(NotificationError::Send(format!(
                "batch processing failed: {} out of {} emails failed",
                failed, total
            )));
        }
        info!(provider = %self.inner.name(), total, "Batch delivered");
        Ok(())
    }

    /// One bulk call per distinct (subject, body, sender).
    async fn send_grouped(&self, batch: Vec<Message>) -> usize {
        let mut groups: Vec<BulkMessage> = Vec::new();
        for message in batch {
            match groups.iter_mut().find(|g| {
                g.subject == message.subject && g.body == message.body && g.from == message.from
            }) {
                Some(group) => group.to.push(message.to),
                None => groups.push(BulkMessage {
                    to: vec![message.to],
                    subject: message.subject,
                    body: message.body,
                    from: message.from,
                }),
            }
        }

        let mut failed = 0;
        for group in groups {
            if let Err(e) = self.inner.send_bulk_email(&group).await {
                warn!(
                    provider = %self.inner.name(),
                    recipients = group.to.len(),
                    error = %e,
                    "Bulk send of batch group failed"
                );
                failed += group.to.len();
            }
        }
        failed
    }

    async fn send_each(&self, batch: Vec<Message>) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut join_set: JoinSet<bool> = JoinSet::new();

        for message in batch {
            let semaphore = Arc::clone(&semaphore);
            let inner = Arc::clone(&self.inner);
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return false;
                };
                inner.send_email(&message).await.is_ok()
            });
        }

        let mut failed = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    error!(error = %e, "Batch send task panicked");
                    failed += 1;
                }
            }
        }
        failed
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let timeout = self.settings.timeout;
        let mut ticker = tokio::time::interval_at(Instant::now() + timeout, timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.flush().await {
                error!(provider = %self.inner.name(), error = %e, "Batch processing error");
            }
            ticker.reset();
        }

        debug!(provider = %self.inner.name(), "Batch timer stopped");
    }
}

/// Decorator that queues single sends and delivers them in batches.
///
/// `send_email` succeeds as soon as the message is queued. The delivery
/// outcome is only visible in the logs of the flush that carries it.
pub struct BatchedProvider {
    state: Arc<BatchState>,
    shutdown_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BatchedProvider {
    /// Wrap `inner` and start its batch timer. Requires a Tokio runtime.
    pub fn new(inner: Arc<dyn EmailProvider>, settings: BatchSettings) -> NotificationResult<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            NotificationError::Configuration(format!(
                "batching for provider '{}' needs a Tokio runtime: {}",
                inner.name(),
                e
            ))
        })?;

        let settings = BatchSettings {
            batch_size: settings.batch_size.max(1),
            timeout: settings.timeout.max(Duration::from_millis(1)),
            concurrency: settings.concurrency.max(1),
        };
        let state = Arc::new(BatchState {
            inner,
            settings,
            batch: Mutex::new(Vec::with_capacity(settings.batch_size)),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = handle.spawn(Arc::clone(&state).run(shutdown_rx));

        info!(
            provider = %state.inner.name(),
            batch_size = settings.batch_size,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Batching enabled"
        );

        Ok(Self {
            state,
            shutdown_tx,
            task: std::sync::Mutex::new(Some(task)),
        })
    }

    pub fn settings(&self) -> BatchSettings {
        self.state.settings
    }

    /// Number of messages waiting for the next flush.
    pub async fn pending(&self) -> usize {
        self.state.batch.lock().await.len()
    }

    /// Deliver the current batch now.
    pub async fn flush(&self) -> NotificationResult<()> {
        self.state.flush().await
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl EmailProvider for BatchedProvider {
    async fn send_email(&self, message: &Message) -> NotificationResult<()> {
        self.state.enqueue([message.clone()]).await;
        Ok(())
    }

    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()> {
        self.state.enqueue(message.messages()).await;
        Ok(())
    }

    fn supports_bulk(&self) -> bool {
        self.state.inner.supports_bulk()
    }

    fn limits(&self) -> ProviderLimits {
        ProviderLimits {
            max_batch_size: self.state.settings.batch_size,
            ..self.state.inner.limits()
        }
    }

    fn stats(&self) -> ProviderStats {
        self.state.inner.stats()
    }

    fn name(&self) -> &str {
        self.state.inner.name()
    }

    fn kind(&self) -> ProviderKind {
        self.state.inner.kind()
    }

    fn priority(&self) -> i32 {
        self.state.inner.priority()
    }

    fn is_enabled(&self) -> bool {
        self.state.inner.is_enabled()
    }

    fn validate_config(&self) -> NotificationResult<()> {
        self.state.inner.validate_config()
    }

    async fn shutdown(&self) -> NotificationResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.take_task()
            && let Err(e) = task.await
        {
            warn!(provider = %self.name(), error = %e, "Batch timer task ended abnormally");
        }

        let remaining = self.pending().await;
        if remaining > 0 {
            info!(provider = %self.name(), remaining, "Flushing remaining batch on shutdown");
        }
        let result = self.state.flush().await;
        self.state.inner.shutdown().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockEmailProvider;

    const LONG: Duration = Duration::from_secs(3600);

    fn settings(batch_size: usize, timeout: Duration) -> BatchSettings {
        BatchSettings {
            batch_size,
            timeout,
            concurrency: 5,
        }
    }

    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_send_returns_ok_on_enqueue() {
        let inner = Arc::new(MockEmailProvider::new("smtp"));
        let batched = BatchedProvider::new(inner.clone(), settings(10, LONG)).unwrap();

        batched
            .send_email(&Message::new("a@example.com", "S", "B"))
            .await
            .unwrap();

        assert_eq!(batched.pending().await, 1);
        assert_eq!(inner.sent_count().await, 0);
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flushes_when_size_reached() {
        let inner = Arc::new(MockEmailProvider::new("smtp"));
        let batched = BatchedProvider::new(inner.clone(), settings(3, LONG)).unwrap();

        for i in 0..3 {
            batched
                .send_email(&Message::new(format!("r{}@example.com", i), "S", "B"))
                .await
                .unwrap();
        }

        let observed = inner.clone();
        wait_for(|| {
            let observed = observed.clone();
            async move { observed.sent_count().await == 3 }
        })
        .await;
        assert_eq!(batched.pending().await, 0);
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_accumulator_stays_bounded_during_slow_flush() {
        let inner = Arc::new(MockEmailProvider::new("smtp").with_delay(Duration::from_millis(200)));
        let batched = Arc::new(BatchedProvider::new(inner.clone(), settings(3, LONG)).unwrap());

        let first = {
            let batched = Arc::clone(&batched);
            tokio::spawn(async move {
                for i in 0..3 {
                    batched
                        .send_email(&Message::new(format!("first{}@example.com", i), "S", "B"))
                        .await
                        .unwrap();
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        for i in 0..10 {
            batched
                .send_email(&Message::new(format!("more{}@example.com", i), "S", "B"))
                .await
                .unwrap();
            assert!(batched.pending().await <= 3);
        }
        first.await.unwrap();

        assert_eq!(inner.sent_count().await, 12);
        assert_eq!(batched.pending().await, 1);
        batched.shutdown().await.unwrap();
        assert_eq!(inner.sent_count().await, 13);
    }

    #[tokio::test]
    async fn test_bulk_enqueue_is_split_into_batches() {
        let inner = Arc::new(MockEmailProvider::new("api").with_bulk(100));
        let batched = BatchedProvider::new(inner.clone(), settings(4, LONG)).unwrap();

        let recipients: Vec<String> = (0..10).map(|i| format!("r{}@example.com", i)).collect();
        batched
            .send_bulk_email(&BulkMessage::new(recipients, "S", "B"))
            .await
            .unwrap();

        let sizes: Vec<usize> = inner.bulk_calls().await.iter().map(|c| c.to.len()).collect();
        assert_eq!(sizes, vec![4, 4]);
        assert_eq!(batched.pending().await, 2);
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flushes_undersized_batch_after_timeout() {
        let inner = Arc::new(MockEmailProvider::new("smtp"));
        let batched =
            BatchedProvider::new(inner.clone(), settings(50, Duration::from_millis(50))).unwrap();

        batched
            .send_email(&Message::new("a@example.com", "S", "B"))
            .await
            .unwrap();
        assert_eq!(inner.sent_count().await, 0);

        let observed = inner.clone();
        wait_for(|| {
            let observed = observed.clone();
            async move { observed.sent_count().await == 1 }
        })
        .await;
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remainder() {
        let inner = Arc::new(MockEmailProvider::new("smtp"));
        let batched = BatchedProvider::new(inner.clone(), settings(50, LONG)).unwrap();

        let bulk = BulkMessage::new(
            vec!["a@example.com".into(), "b@example.com".into()],
            "S",
            "B",
        );
        batched.send_bulk_email(&bulk).await.unwrap();
        assert_eq!(batched.pending().await, 2);

        batched.shutdown().await.unwrap();
        assert_eq!(inner.sent_count().await, 2);
        assert_eq!(batched.pending().await, 0);
    }

    #[tokio::test]
    async fn test_failed_sends_summarised() {
        let inner = Arc::new(MockEmailProvider::new("smtp").failing_for("bad@example.com"));
        let batched = BatchedProvider::new(inner.clone(), settings(50, LONG)).unwrap();

        for to in ["good@example.com", "bad@example.com", "fine@example.com"] {
            batched.send_email(&Message::new(to, "S", "B")).await.unwrap();
        }

        let err = batched.flush().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Send failed: batch processing failed: 1 out of 3 emails failed"
        );
        assert_eq!(inner.sent_count().await, 2);
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency() {
        let inner = Arc::new(MockEmailProvider::new("smtp").with_delay(Duration::from_millis(20)));
        let batched = BatchedProvider::new(
            inner.clone(),
            BatchSettings {
                batch_size: 50,
                timeout: LONG,
                concurrency: 2,
            },
        )
        .unwrap();

        for i in 0..6 {
            batched
                .send_email(&Message::new(format!("r{}@example.com", i), "S", "B"))
                .await
                .unwrap();
        }
        batched.flush().await.unwrap();

        assert_eq!(inner.sent_count().await, 6);
        assert!(inner.max_concurrency() <= 2);
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bulk_inner_never_mixes_content() {
        let inner = Arc::new(MockEmailProvider::new("api").with_bulk(100));
        let batched = BatchedProvider::new(inner.clone(), settings(50, LONG)).unwrap();

        batched.send_email(&Message::new("a@example.com", "First", "One")).await.unwrap();
        batched.send_email(&Message::new("b@example.com", "Second", "Two")).await.unwrap();
        batched.send_email(&Message::new("c@example.com", "First", "One")).await.unwrap();
        batched.flush().await.unwrap();

        let calls = inner.bulk_calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].subject, "First");
        assert_eq!(calls[0].to, vec!["a@example.com", "c@example.com"]);
        assert_eq!(calls[1].subject, "Second");
        assert_eq!(calls[1].to, vec!["b@example.com"]);
        batched.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_descriptor_delegates_to_inner() {
        let inner = Arc::new(MockEmailProvider::new("office").with_priority(7));
        let batched = BatchedProvider::new(inner, settings(25, LONG)).unwrap();

        assert_eq!(batched.name(), "office");
        assert_eq!(batched.priority(), 7);
        assert_eq!(batched.kind(), ProviderKind::Smtp);
        assert!(!batched.supports_bulk());
        assert_eq!(batched.limits().max_batch_size, 25);
        assert!(batched.is_healthy());
        batched.shutdown().await.unwrap();
    }

    #[test]
    fn test_settings_for_provider() {
        let config = DispatchConfig::default();

        let smtp = MockEmailProvider::new("smtp");
        assert_eq!(BatchSettings::for_provider(&smtp, &config).batch_size, 50);

        let api = MockEmailProvider::new("api").with_bulk(200);
        let api_settings = BatchSettings::for_provider(&api, &config);
        assert_eq!(api_settings.batch_size, 200);
        assert_eq!(api_settings.timeout, Duration::from_secs(30));
        assert_eq!(api_settings.concurrency, 5);
    }

    #[test]
    fn test_new_outside_runtime_is_configuration_error() {
        let result = BatchedProvider::new(
            Arc::new(MockEmailProvider::new("smtp")),
            BatchSettings::default(),
        );
        assert!(matches!(result, Err(NotificationError::Configuration(_))));
    }
}
