use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};

use crate::{
    entity::{content, email_log, subscriber, subscription},
    error::{NotificationError, NotificationResult},
    models::{
        ContentId, ContentItem, DeliveryRecord, DeliveryRecordId, DeliveryStatus,
        NewDeliveryRecord, Subscriber, SubscriberId, TopicId,
    },
    repository::{ContentRepository, DeliveryLogRepository, SubscriberRepository},
};

pub struct PgContentRepository {
    db: DatabaseConnection,
}

impl PgContentRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContentRepository for PgContentRepository {
    async fn get_by_id(&self, id: ContentId) -> NotificationResult<Option<ContentItem>> {
        let model = content::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }

    async fn get_pending_notifications(&self) -> NotificationResult<Vec<ContentId>> {
        let models = content::Entity::find()
            .filter(content::Column::IsPublished.eq(true))
            .filter(content::Column::NotificationsSent.eq(false))
            .order_by_asc(content::Column::Id)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(|m| m.id).collect())
    }

    async fn mark_notifications_sent(&self, id: ContentId) -> NotificationResult<()> {
        let now = chrono::Utc::now();
        let result = content::Entity::update_many()
            .col_expr(content::Column::NotificationsSent, Expr::value(true))
            .col_expr(content::Column::NotificationsSentAt, Expr::value(now))
            .col_expr(content::Column::UpdatedAt, Expr::value(now))
            .filter(content::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(NotificationError::ContentNotFound(id));
        }

        tracing::info!(content_id = id, "Marked notifications sent");
        Ok(())
    }
}

pub struct PgSubscriberRepository {
    db: DatabaseConnection,
}

impl PgSubscriberRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriberRepository for PgSubscriberRepository {
    async fn get_subscriptions_by_topic(
        &self,
        topic_id: TopicId,
    ) -> NotificationResult<Vec<SubscriberId>> {
        let models = subscription::Entity::find()
            .filter(subscription::Column::TopicId.eq(topic_id))
            .order_by_desc(subscription::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(|m| m.subscriber_id).collect())
    }

    async fn get_subscriber_by_id(
        &self,
        id: SubscriberId,
    ) -> NotificationResult<Option<Subscriber>> {
        let model = subscriber::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }
}

pub struct PgDeliveryLogRepository {
    db: DatabaseConnection,
}

impl PgDeliveryLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeliveryLogRepository for PgDeliveryLogRepository {
    async fn create(&self, record: NewDeliveryRecord) -> NotificationResult<DeliveryRecord> {
        let active_model: email_log::ActiveModel = record.into();
        let model = active_model.insert(&self.db).await?;

        tracing::debug!(
            email_log_id = model.id,
            content_id = model.content_id,
            status = %model.status,
            "Created email log"
        );
        model.try_into()
    }

    async fn save(&self, record: &DeliveryRecord) -> NotificationResult<()> {
        let active_model: email_log::ActiveModel = record.into();
        active_model.update(&self.db).await?;
        Ok(())
    }

    async fn find_retryable(&self, max_retry_count: i32) -> NotificationResult<Vec<DeliveryRecord>> {
        let models = email_log::Entity::find()
            .filter(email_log::Column::Status.eq(DeliveryStatus::Failed.as_ref()))
            .filter(email_log::Column::RetryCount.lt(max_retry_count))
            .all(&self.db)
            .await?;

        models.into_iter().map(TryInto::try_into).collect()
    }

    async fn list(&self) -> NotificationResult<Vec<DeliveryRecord>> {
        let models = email_log::Entity::find()
            .order_by_asc(email_log::Column::Id)
            .all(&self.db)
            .await?;

        models.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_paginated(
        &self,
        offset: u64,
        limit: u64,
    ) -> NotificationResult<(Vec<DeliveryRecord>, u64)> {
        let total = email_log::Entity::find().count(&self.db).await?;

        let models = email_log::Entity::find()
            .order_by_asc(email_log::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;

        let records = models
            .into_iter()
            .map(TryInto::try_into)
            .collect::<NotificationResult<Vec<_>>>()?;
        Ok((records, total))
    }

    async fn get_by_id(&self, id: DeliveryRecordId) -> NotificationResult<Option<DeliveryRecord>> {
        email_log::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }
}
