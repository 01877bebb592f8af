//! Dispatch orchestration: turns one content item into per-recipient sends
//! and delivery records, and re-attempts failed deliveries.
//!
//! ```text
//! content ──► active subscribers ──► > bulk_threshold and a healthy bulk provider?
//!                                        │ yes                    │ no
//!                                        ▼                        ▼
//!                                  one bulk call ──fail──► distribute over providers
//!                                        │                        │ (semaphore-bounded)
//!                                        ▼                        ▼
//!                                 one record per recipient, content marked notified
//! ```
//!
//! Dispatch is not idempotent. Calling [`Dispatcher::dispatch_content`] twice
//! for the same content sends again and writes a second set of records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DispatchConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    BulkMessage, ContentId, ContentItem, DeliveryRecord, Message, NewDeliveryRecord, SubscriberId,
};
use crate::providers::EmailProvider;
use crate::registry::ProviderRegistry;
use crate::repository::{ContentRepository, DeliveryLogRepository, SubscriberRepository};

/// Which delivery path a dispatch ended up taking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DispatchPath {
    /// No active recipients, nothing sent.
    Skipped,
    Bulk,
    Distributed,
    /// Bulk was attempted, failed, and the recipients were distributed.
    BulkFallback,
}

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub content_id: ContentId,
    pub recipients: usize,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub path: DispatchPath,
}

/// Outcome counts of one retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub recovered: usize,
    pub failed: usize,
    /// Records whose subscriber is missing or inactive.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct Recipient {
    subscriber_id: SubscriberId,
    email: String,
}

#[derive(Debug)]
struct Delivery {
    subscriber_id: SubscriberId,
    message: Message,
}

#[derive(Debug, Default)]
struct Tally {
    attempted: usize,
    sent: usize,
    failed: usize,
    not_started: usize,
}

/// Send one message, failing with [`NotificationError::Timeout`] after `timeout`.
async fn send_with_timeout(
    provider: &dyn EmailProvider,
    message: &Message,
    timeout: Duration,
) -> NotificationResult<()> {
    match tokio::time::timeout(timeout, provider.send_email(message)).await {
        Ok(result) => result,
        Err(_) => Err(NotificationError::Timeout(timeout)),
    }
}

pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    contents: Arc<dyn ContentRepository>,
    subscribers: Arc<dyn SubscriberRepository>,
    delivery_log: Arc<dyn DeliveryLogRepository>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        contents: Arc<dyn ContentRepository>,
        subscribers: Arc<dyn SubscriberRepository>,
        delivery_log: Arc<dyn DeliveryLogRepository>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            contents,
            subscribers,
            delivery_log,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn contents(&self) -> &Arc<dyn ContentRepository> {
        &self.contents
    }

    /// Notify every active subscriber of the content's topic.
    ///
    /// Per-recipient failures are recorded, not returned. Errors are returned
    /// only when the whole operation fails: unknown content, no providers, a
    /// failed subscription lookup, or cancellation. When cancelled midway the
    /// sends already started are recorded and the content is still marked.
    #[instrument(skip(self, cancel))]
    pub async fn dispatch_content(
        &self,
        content_id: ContentId,
        cancel: &CancellationToken,
    ) -> NotificationResult<DispatchSummary> {
        if cancel.is_cancelled() {
            return Err(NotificationError::Cancelled);
        }

        let content = self
            .contents
            .get_by_id(content_id)
            .await?
            .ok_or(NotificationError::ContentNotFound(content_id))?;

        let recipients = self.active_recipients(&content).await?;
        if recipients.is_empty() {
            info!("No active subscribers for content");
            return Ok(DispatchSummary {
                content_id,
                recipients: 0,
                attempted: 0,
                sent: 0,
                failed: 0,
                path: DispatchPath::Skipped,
            });
        }

        if self.registry.is_empty() {
            return Err(NotificationError::NoProviders(format!(
                "cannot dispatch content {}",
                content_id
            )));
        }

        let mut path = DispatchPath::Distributed;
        if recipients.len() > self.config.bulk_threshold
            && let Some(provider) = self.registry.preferred_bulk_provider()
        {
            match self.send_bulk(provider.as_ref(), &content, &recipients).await {
                Ok(()) => {
                    let tally = self.record_bulk_success(&content, &recipients).await;
                    self.mark_notified(content_id).await;
                    return Ok(self.summarize(&content, recipients.len(), &tally, DispatchPath::Bulk));
                }
                Err(e) => {
                    warn!(
                        provider = %provider.name(),
                        recipients = recipients.len(),
                        error = %e,
                        "Bulk send failed, falling back to distributed sending"
                    );
                    path = DispatchPath::BulkFallback;
                }
            }
        }

        let total = recipients.len();
        let deliveries = recipients
            .into_iter()
            .map(|r| Delivery {
                subscriber_id: r.subscriber_id,
                message: Message::new(r.email, &content.title, &content.body),
            })
            .collect();
        let tally = self.send_distributed(content_id, deliveries, cancel).await;

        if tally.attempted > 0 {
            self.mark_notified(content_id).await;
        }

        let summary = self.summarize(&content, total, &tally, path);
        if tally.not_started > 0 {
            warn!(
                attempted = tally.attempted,
                not_started = tally.not_started,
                "Dispatch cancelled before all recipients were attempted"
            );
            return Err(NotificationError::Cancelled);
        }

        info!(
            sent = summary.sent,
            failed = summary.failed,
            path = %summary.path,
            "Dispatch finished"
        );
        Ok(summary)
    }

    /// Resend failed deliveries below the retry ceiling through the provider
    /// the registry selects.
    #[instrument(skip(self, cancel))]
    pub async fn retry_failed(&self, cancel: &CancellationToken) -> NotificationResult<RetrySummary> {
        let provider = self.registry.select(1).ok_or_else(|| {
            NotificationError::NoProviders("no provider available for retry".to_string())
        })?;
        self.retry_failed_with(provider, cancel).await
    }

    /// Resend failed deliveries below the retry ceiling through `provider`.
    ///
    /// Records are processed one at a time in query order and each one is
    /// saved on its own.
    #[instrument(skip(self, provider, cancel), fields(provider = %provider.name()))]
    pub async fn retry_failed_with(
        &self,
        provider: Arc<dyn EmailProvider>,
        cancel: &CancellationToken,
    ) -> NotificationResult<RetrySummary> {
        let records = self
            .delivery_log
            .find_retryable(self.config.max_retry_count)
            .await?;

        let mut summary = RetrySummary::default();
        if records.is_empty() {
            debug!("No failed deliveries to retry");
            return Ok(summary);
        }

        for mut record in records {
            if cancel.is_cancelled() {
                warn!(?summary, "Retry sweep cancelled");
                return Err(NotificationError::Cancelled);
            }

            if !self.subscriber_is_active(&record).await {
                summary.skipped += 1;
                continue;
            }

            summary.attempted += 1;
            let result =
                send_with_timeout(provider.as_ref(), &record.message(), self.config.send_timeout())
                    .await;
            match result {
                Ok(()) => {
                    record.mark_sent();
                    summary.recovered += 1;
                }
                Err(e) => {
                    record.mark_retry_failed(e.to_string());
                    summary.failed += 1;
                }
            }

            if let Err(e) = self.delivery_log.save(&record).await {
                error!(email_log_id = record.id, error = %e, "Failed to save retried delivery");
            }
        }

        info!(
            attempted = summary.attempted,
            recovered = summary.recovered,
            failed = summary.failed,
            skipped = summary.skipped,
            "Retry sweep finished"
        );
        Ok(summary)
    }

    async fn active_recipients(&self, content: &ContentItem) -> NotificationResult<Vec<Recipient>> {
        let subscriber_ids = self
            .subscribers
            .get_subscriptions_by_topic(content.topic_id)
            .await?;

        let mut recipients = Vec::with_capacity(subscriber_ids.len());
        for subscriber_id in subscriber_ids {
            match self.subscribers.get_subscriber_by_id(subscriber_id).await {
                Ok(Some(subscriber)) if subscriber.is_active => recipients.push(Recipient {
                    subscriber_id,
                    email: subscriber.email,
                }),
                Ok(_) => {}
                Err(e) => {
                    warn!(subscriber_id, error = %e, "Subscriber lookup failed, skipping");
                }
            }
        }
        Ok(recipients)
    }

    async fn subscriber_is_active(&self, record: &DeliveryRecord) -> bool {
        match self.subscribers.get_subscriber_by_id(record.subscriber_id).await {
            Ok(Some(subscriber)) => subscriber.is_active,
            Ok(None) => false,
            Err(e) => {
                warn!(
                    subscriber_id = record.subscriber_id,
                    error = %e,
                    "Subscriber lookup failed, skipping retry"
                );
                false
            }
        }
    }

    async fn send_bulk(
        &self,
        provider: &dyn EmailProvider,
        content: &ContentItem,
        recipients: &[Recipient],
    ) -> NotificationResult<()> {
        let bulk = BulkMessage::new(
            recipients.iter().map(|r| r.email.clone()).collect(),
            &content.title,
            &content.body,
        );
        debug!(
            provider = %provider.name(),
            recipients = recipients.len(),
            "Sending bulk email"
        );

        let timeout = self.config.send_timeout();
        match tokio::time::timeout(timeout, provider.send_bulk_email(&bulk)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(timeout)),
        }
    }

    async fn record_bulk_success(&self, content: &ContentItem, recipients: &[Recipient]) -> Tally {
        let mut tally = Tally::default();
        for recipient in recipients {
            let message = Message::new(&recipient.email, &content.title, &content.body);
            tally.attempted += 1;
            tally.sent += 1;
            self.write_record(NewDeliveryRecord::sent(
                recipient.subscriber_id,
                content.id,
                &message,
            ))
            .await;
        }
        tally
    }

    /// Partition deliveries across providers and send them under the
    /// concurrency bound. Deliveries that have not acquired a permit when
    /// `cancel` fires are not attempted.
    async fn send_distributed(
        &self,
        content_id: ContentId,
        deliveries: Vec<Delivery>,
        cancel: &CancellationToken,
    ) -> Tally {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency()));
        let timeout = self.config.send_timeout();
        let mut join_set: JoinSet<Option<NotificationResult<()>>> = JoinSet::new();
        // Keyed by task so a panicked send still gets its record.
        let mut in_flight: HashMap<task::Id, Delivery> = HashMap::new();

        for (provider, group) in self.registry.distribute(deliveries) {
            debug!(
                provider = %provider.name(),
                recipients = group.len(),
                "Assigned recipients to provider"
            );

            for delivery in group {
                let provider = Arc::clone(&provider);
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let message = delivery.message.clone();

                let handle = join_set.spawn(async move {
                    let permit = tokio::select! {
                        biased;

                        _ = cancel.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let _permit = permit?;

                    Some(send_with_timeout(provider.as_ref(), &message, timeout).await)
                });
                in_flight.insert(handle.id(), delivery);
            }
        }

        let mut tally = Tally::default();
        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, outcome)) => match outcome {
                    Some(result) => (id, result),
                    None => {
                        in_flight.remove(&id);
                        tally.not_started += 1;
                        continue;
                    }
                },
                Err(e) => {
                    error!(error = %e, "Send task panicked");
                    (e.id(), Err(NotificationError::Send(format!("send task panicked: {}", e))))
                }
            };

            let Some(delivery) = in_flight.remove(&id) else {
                error!(task = %id, "Finished send task has no delivery");
                continue;
            };

            tally.attempted += 1;
            let record = match result {
                Ok(()) => {
                    tally.sent += 1;
                    NewDeliveryRecord::sent(delivery.subscriber_id, content_id, &delivery.message)
                }
                Err(e) => {
                    tally.failed += 1;
                    debug!(
                        to = %delivery.message.to,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Send failed"
                    );
                    NewDeliveryRecord::failed(
                        delivery.subscriber_id,
                        content_id,
                        &delivery.message,
                        e.to_string(),
                    )
                }
            };
            self.write_record(record).await;
        }
        tally
    }

    async fn write_record(&self, record: NewDeliveryRecord) {
        let email = record.email_address.clone();
        if let Err(e) = self.delivery_log.create(record).await {
            error!(to = %email, error = %e, "Failed to write delivery record");
        }
    }

    async fn mark_notified(&self, content_id: ContentId) {
        if let Err(e) = self.contents.mark_notifications_sent(content_id).await {
            error!(content_id, error = %e, "Failed to mark notifications sent");
        }
    }

    fn summarize(
        &self,
        content: &ContentItem,
        recipients: usize,
        tally: &Tally,
        path: DispatchPath,
    ) -> DispatchSummary {
        DispatchSummary {
            content_id: content.id,
            recipients,
            attempted: tally.attempted,
            sent: tally.sent,
            failed: tally.failed,
            path,
        }
    }
}
