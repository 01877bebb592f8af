//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

pub type ContentId = i64;
pub type TopicId = i64;
pub type SubscriberId = i64;
pub type DeliveryRecordId = i64;

// ============================================================================
// Outbound messages
// ============================================================================

/// A single email ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Recipient email address.
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Sender override. Providers fall back to their configured sender.
    pub from: Option<String>,
}

impl Message {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            from: None,
        }
    }

    /// Builder method to override the sender.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

/// One subject/body pair addressed to many recipients.
///
/// A bulk message never mixes content from two content items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub from: Option<String>,
}

impl BulkMessage {
    pub fn new(to: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            body: body.into(),
            from: None,
        }
    }

    /// Split into one `Message` per recipient.
    pub fn messages(&self) -> impl Iterator<Item = Message> + '_ {
        self.to.iter().map(|to| Message {
            to: to.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            from: self.from.clone(),
        })
    }
}

// ============================================================================
// Collaborator views
// ============================================================================

/// Published content to notify subscribers about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub topic_id: TopicId,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub email: String,
    pub is_active: bool,
}

// ============================================================================
// Delivery log
// ============================================================================

/// Outcome of one attempted delivery.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// Input for creating a delivery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeliveryRecord {
    pub subscriber_id: SubscriberId,
    pub content_id: ContentId,
    pub email_address: String,
    pub subject: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl NewDeliveryRecord {
    /// Record for a message the provider accepted.
    pub fn sent(subscriber_id: SubscriberId, content_id: ContentId, message: &Message) -> Self {
        Self {
            subscriber_id,
            content_id,
            email_address: message.to.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            status: DeliveryStatus::Sent,
            sent_at: Some(Utc::now()),
            error_message: None,
        }
    }

    /// Record for a message that could not be delivered.
    pub fn failed(
        subscriber_id: SubscriberId,
        content_id: ContentId,
        message: &Message,
        error: impl Into<String>,
    ) -> Self {
        Self {
            subscriber_id,
            content_id,
            email_address: message.to.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            status: DeliveryStatus::Failed,
            sent_at: None,
            error_message: Some(error.into()),
        }
    }
}

/// Persisted outcome of one attempted send to one recipient for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryRecordId,
    pub subscriber_id: SubscriberId,
    pub content_id: ContentId,
    pub email_address: String,
    pub subject: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Rebuild the message this record was created from.
    pub fn message(&self) -> Message {
        Message::new(&self.email_address, &self.subject, &self.body)
    }

    /// Apply a successful resend.
    pub fn mark_sent(&mut self) {
        let now = Utc::now();
        self.status = DeliveryStatus::Sent;
        self.sent_at = Some(now);
        self.error_message = None;
        self.updated_at = now;
    }

    /// Apply a failed resend.
    pub fn mark_retry_failed(&mut self, error: impl Into<String>) {
        self.retry_count += 1;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record() -> DeliveryRecord {
        DeliveryRecord {
            id: 1,
            subscriber_id: 10,
            content_id: 20,
            email_address: "reader@example.com".into(),
            subject: "Weekly".into(),
            body: "<p>hi</p>".into(),
            status: DeliveryStatus::Failed,
            sent_at: None,
            error_message: Some("timeout".into()),
            retry_count: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_delivery_status_strings() {
        assert_eq!(DeliveryStatus::Sent.to_string(), "sent");
        assert_eq!(DeliveryStatus::Failed.as_ref(), "failed");
        assert_eq!(
            DeliveryStatus::from_str("pending").unwrap(),
            DeliveryStatus::Pending
        );
        assert!(DeliveryStatus::from_str("bounced").is_err());
    }

    #[test]
    fn test_bulk_message_splits_per_recipient() {
        let bulk = BulkMessage::new(
            vec!["a@example.com".into(), "b@example.com".into()],
            "Subject",
            "Body",
        );
        let messages: Vec<Message> = bulk.messages().collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].to, "b@example.com");
        assert_eq!(messages[1].subject, "Subject");
    }

    #[test]
    fn test_mark_sent_clears_error() {
        let mut record = record();
        record.mark_sent();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert!(record.sent_at.is_some());
        assert!(record.error_message.is_none());
        assert_eq!(record.retry_count, 1);
    }

    #[test]
    fn test_mark_retry_failed_increments_count() {
        let mut record = record();
        record.mark_retry_failed("connection refused");
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_failed_record_keeps_body_snapshot() {
        let message = Message::new("x@example.com", "Hello", "Body").with_from("news@example.com");
        let record = NewDeliveryRecord::failed(1, 2, &message, "boom");
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.body, "Body");
        assert!(record.sent_at.is_none());
    }
}
