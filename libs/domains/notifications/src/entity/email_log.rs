use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::NotificationError;
use crate::models::{DeliveryRecord, DeliveryStatus, NewDeliveryRecord};

/// Sea-ORM Entity for the email_logs table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub subscriber_id: i64,
    pub content_id: i64,
    pub email_address: String,
    pub subject: String,
    #[sea_orm(column_type = "Text")]
    pub body: String,
    pub status: String,
    pub sent_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for DeliveryRecord {
    type Error = NotificationError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::from_str(&model.status).map_err(|_| {
            NotificationError::Repository(format!(
                "email log {} has unknown status '{}'",
                model.id, model.status
            ))
        })?;

        Ok(Self {
            id: model.id,
            subscriber_id: model.subscriber_id,
            content_id: model.content_id,
            email_address: model.email_address,
            subject: model.subject,
            body: model.body,
            status,
            sent_at: model.sent_at.map(Into::into),
            error_message: model.error_message,
            retry_count: model.retry_count,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        })
    }
}

// Conversion from a new delivery record to an insertable ActiveModel
impl From<NewDeliveryRecord> for ActiveModel {
    fn from(input: NewDeliveryRecord) -> Self {
        let now = chrono::Utc::now();
        ActiveModel {
            id: NotSet,
            subscriber_id: Set(input.subscriber_id),
            content_id: Set(input.content_id),
            email_address: Set(input.email_address),
            subject: Set(input.subject),
            body: Set(input.body),
            status: Set(input.status.to_string()),
            sent_at: Set(input.sent_at.map(Into::into)),
            error_message: Set(input.error_message),
            retry_count: Set(0),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }
}

// Full overwrite of an existing row from the domain record
impl From<&DeliveryRecord> for ActiveModel {
    fn from(record: &DeliveryRecord) -> Self {
        ActiveModel {
            id: Set(record.id),
            subscriber_id: Set(record.subscriber_id),
            content_id: Set(record.content_id),
            email_address: Set(record.email_address.clone()),
            subject: Set(record.subject.clone()),
            body: Set(record.body.clone()),
            status: Set(record.status.to_string()),
            sent_at: Set(record.sent_at.map(Into::into)),
            error_message: Set(record.error_message.clone()),
            retry_count: Set(record.retry_count),
            created_at: Set(record.created_at.into()),
            updated_at: Set(record.updated_at.into()),
        }
    }
}
