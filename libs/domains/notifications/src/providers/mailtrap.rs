//! Mailtrap sending API provider.

use super::{
    DEFAULT_SEND_TIMEOUT, EmailProvider, HealthTracker, ProviderKind, ProviderLimits,
    ProviderStats, http_client, require_fields,
};
use crate::config::ApiProviderConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info};

const SENDER_NAME: &str = "Newsletter Service";
const CATEGORY: &str = "Newsletter";

#[derive(Debug, Serialize)]
struct MailtrapRequest<'a> {
    from: Sender<'a>,
    to: Vec<Recipient<'a>>,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
    category: &'static str,
}

#[derive(Debug, Serialize)]
struct Sender<'a> {
    email: &'a str,
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    email: &'a str,
}

/// Mailtrap email provider. Succeeds only on `200 OK`.
pub struct MailtrapProvider {
    name: String,
    config: ApiProviderConfig,
    client: Client,
    health: HealthTracker,
}

impl MailtrapProvider {
    pub fn new(name: impl Into<String>, config: ApiProviderConfig) -> NotificationResult<Self> {
        Ok(Self {
            name: name.into(),
            health: HealthTracker::new(config.max_emails_per_hour),
            config,
            client: http_client(DEFAULT_SEND_TIMEOUT)?,
        })
    }

    async fn post(
        &self,
        to: &[String],
        subject: &str,
        body: &str,
        from: Option<&str>,
    ) -> NotificationResult<()> {
        let request = MailtrapRequest {
            from: Sender {
                email: from.filter(|f| !f.is_empty()).unwrap_or(&self.config.from),
                name: SENDER_NAME,
            },
            to: to.iter().map(|email| Recipient { email }).collect(),
            subject,
            text: body,
            html: body,
            category: CATEGORY,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(NotificationError::Send(format!(
            "Mailtrap error ({}): {}",
            status, text
        )))
    }
}

#[async_trait]
impl EmailProvider for MailtrapProvider {
    async fn send_email(&self, message: &Message) -> NotificationResult<()> {
        debug!(provider = %self.name, to = %message.to, "Sending email via Mailtrap");

        let to = [message.to.clone()];
        let result = self
            .post(&to, &message.subject, &message.body, message.from.as_deref())
            .await;
        match &result {
            Ok(()) => info!(provider = %self.name, to = %message.to, "Email sent via Mailtrap"),
            Err(e) => error!(
                provider = %self.name,
                to = %message.to,
                error = %e,
                "Failed to send email via Mailtrap"
            ),
        }

        self.health.track(1, result)
    }

    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()> {
        let recipients = message.to.len();
        debug!(provider = %self.name, recipients, "Sending bulk email via Mailtrap");

        let result = self
            .post(&message.to, &message.subject, &message.body, message.from.as_deref())
            .await;
        if let Err(e) = &result {
            error!(provider = %self.name, recipients, error = %e, "Mailtrap bulk send failed");
        }

        self.health.track(recipients as u32, result)
    }

    fn supports_bulk(&self) -> bool {
        self.config.bulk_enabled
    }

    fn limits(&self) -> ProviderLimits {
        ProviderLimits {
            max_emails_per_hour: self.config.max_emails_per_hour,
            max_batch_size: self.config.max_batch_size,
            supports_bulk: self.config.bulk_enabled,
        }
    }

    fn stats(&self) -> ProviderStats {
        self.health.stats()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Api
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    fn validate_config(&self) -> NotificationResult<()> {
        require_fields(
            &self.name,
            &[
                ("token", !self.config.token.is_empty()),
                ("endpoint", !self.config.endpoint.is_empty()),
                ("from", !self.config.from.is_empty()),
            ],
        )
    }
}
