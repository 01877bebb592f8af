use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    ContentId, ContentItem, DeliveryRecord, DeliveryRecordId, DeliveryStatus, NewDeliveryRecord,
    Subscriber, SubscriberId, TopicId,
};

/// Read access to published content and its notification flag.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Get a content item by ID
    async fn get_by_id(&self, id: ContentId) -> NotificationResult<Option<ContentItem>>;

    /// IDs of content that is published but not yet notified
    async fn get_pending_notifications(&self) -> NotificationResult<Vec<ContentId>>;

    /// Set the one-shot "notifications sent" flag
    async fn mark_notifications_sent(&self, id: ContentId) -> NotificationResult<()>;
}

/// Read access to subscribers and their topic subscriptions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Subscriber IDs subscribed to a topic, active or not
    async fn get_subscriptions_by_topic(
        &self,
        topic_id: TopicId,
    ) -> NotificationResult<Vec<SubscriberId>>;

    async fn get_subscriber_by_id(&self, id: SubscriberId)
    -> NotificationResult<Option<Subscriber>>;
}

/// Persistence for per-recipient delivery outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn create(&self, record: NewDeliveryRecord) -> NotificationResult<DeliveryRecord>;

    /// Persist the mutable fields of an existing record
    async fn save(&self, record: &DeliveryRecord) -> NotificationResult<()>;

    /// Failed records with `retry_count < max_retry_count`
    async fn find_retryable(&self, max_retry_count: i32) -> NotificationResult<Vec<DeliveryRecord>>;

    /// Every record, oldest first
    async fn list(&self) -> NotificationResult<Vec<DeliveryRecord>>;

    /// One page of records, oldest first, with the total record count
    async fn list_paginated(
        &self,
        offset: u64,
        limit: u64,
    ) -> NotificationResult<(Vec<DeliveryRecord>, u64)>;

    async fn get_by_id(&self, id: DeliveryRecordId) -> NotificationResult<Option<DeliveryRecord>>;
}

// ============================================================================
// In-memory implementations (for development/testing)
// ============================================================================

#[derive(Debug, Clone)]
struct StoredContent {
    item: ContentItem,
    is_published: bool,
    notifications_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryContentRepository {
    contents: Arc<RwLock<HashMap<ContentId, StoredContent>>>,
}

impl InMemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a published content item
    pub async fn publish(&self, item: ContentItem) {
        self.insert(item, true).await;
    }

    /// Store an unpublished content item
    pub async fn add_draft(&self, item: ContentItem) {
        self.insert(item, false).await;
    }

    async fn insert(&self, item: ContentItem, is_published: bool) {
        let mut contents = self.contents.write().await;
        contents.insert(
            item.id,
            StoredContent {
                item,
                is_published,
                notifications_sent_at: None,
            },
        );
    }

    pub async fn notifications_sent(&self, id: ContentId) -> bool {
        let contents = self.contents.read().await;
        contents
            .get(&id)
            .is_some_and(|c| c.notifications_sent_at.is_some())
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    async fn get_by_id(&self, id: ContentId) -> NotificationResult<Option<ContentItem>> {
        let contents = self.contents.read().await;
        Ok(contents.get(&id).map(|c| c.item.clone()))
    }

    async fn get_pending_notifications(&self) -> NotificationResult<Vec<ContentId>> {
        let contents = self.contents.read().await;
        let mut pending: Vec<ContentId> = contents
            .values()
            .filter(|c| c.is_published && c.notifications_sent_at.is_none())
            .map(|c| c.item.id)
            .collect();
        pending.sort_unstable();
        Ok(pending)
    }

    async fn mark_notifications_sent(&self, id: ContentId) -> NotificationResult<()> {
        let mut contents = self.contents.write().await;
        let content = contents
            .get_mut(&id)
            .ok_or(NotificationError::ContentNotFound(id))?;
        content.notifications_sent_at = Some(Utc::now());

        tracing::info!(content_id = id, "Marked notifications sent");
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemorySubscriberRepository {
    subscribers: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
    subscriptions: Arc<RwLock<Vec<(SubscriberId, TopicId)>>>,
}

impl InMemorySubscriberRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscriber and subscribe it to `topics`
    pub async fn add(&self, subscriber: Subscriber, topics: &[TopicId]) {
        let id = subscriber.id;
        self.subscribers.write().await.insert(id, subscriber);
        self.subscriptions
            .write()
            .await
            .extend(topics.iter().map(|topic| (id, *topic)));
    }

    pub async fn set_active(&self, id: SubscriberId, is_active: bool) {
        if let Some(subscriber) = self.subscribers.write().await.get_mut(&id) {
            subscriber.is_active = is_active;
        }
    }
}

#[async_trait]
impl SubscriberRepository for InMemorySubscriberRepository {
    async fn get_subscriptions_by_topic(
        &self,
        topic_id: TopicId,
    ) -> NotificationResult<Vec<SubscriberId>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .iter()
            .filter(|(_, topic)| *topic == topic_id)
            .map(|(subscriber, _)| *subscriber)
            .collect())
    }

    async fn get_subscriber_by_id(
        &self,
        id: SubscriberId,
    ) -> NotificationResult<Option<Subscriber>> {
        let subscribers = self.subscribers.read().await;
        Ok(subscribers.get(&id).cloned())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryDeliveryLogRepository {
    records: Arc<RwLock<Vec<DeliveryRecord>>>,
}

impl InMemoryDeliveryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order
    pub async fn all(&self) -> Vec<DeliveryRecord> {
        self.records.read().await.clone()
    }

    pub async fn for_content(&self, content_id: ContentId) -> Vec<DeliveryRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.content_id == content_id)
            .cloned()
            .collect()
    }

    pub async fn count_by_status(&self, status: DeliveryStatus) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl DeliveryLogRepository for InMemoryDeliveryLogRepository {
    async fn create(&self, record: NewDeliveryRecord) -> NotificationResult<DeliveryRecord> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let created = DeliveryRecord {
            id: records.len() as i64 + 1,
            subscriber_id: record.subscriber_id,
            content_id: record.content_id,
            email_address: record.email_address,
            subject: record.subject,
            body: record.body,
            status: record.status,
            sent_at: record.sent_at,
            error_message: record.error_message,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        records.push(created.clone());
        Ok(created)
    }

    async fn save(&self, record: &DeliveryRecord) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| {
                NotificationError::Repository(format!("delivery record {} not found", record.id))
            })?;
        *stored = record.clone();
        Ok(())
    }

    async fn find_retryable(&self, max_retry_count: i32) -> NotificationResult<Vec<DeliveryRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.status == DeliveryStatus::Failed && r.retry_count < max_retry_count)
            .cloned()
            .collect())
    }

    async fn list(&self) -> NotificationResult<Vec<DeliveryRecord>> {
        Ok(self.all().await)
    }

    async fn list_paginated(
        &self,
        offset: u64,
        limit: u64,
    ) -> NotificationResult<(Vec<DeliveryRecord>, u64)> {
        let records = self.records.read().await;
        let page = records
            .iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((page, records.len() as u64))
    }

    async fn get_by_id(&self, id: DeliveryRecordId) -> NotificationResult<Option<DeliveryRecord>> {
        Ok(self.records.read().await.iter().find(|r| r.id == id).cloned())
    }
}
