//! SendGrid email provider implementation.

use super::{
    DEFAULT_SEND_TIMEOUT, EmailProvider, HealthTracker, ProviderKind, ProviderLimits,
    ProviderStats, http_client, require_fields,
};
use crate::config::ApiProviderConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// SendGrid v3 API base URL.
pub const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3";

/// SendGrid email provider.
pub struct SendGridProvider {
    name: String,
    config: ApiProviderConfig,
    api_url: String,
    client: Client,
    health: HealthTracker,
}

impl SendGridProvider {
    /// Create a new SendGrid provider. An empty endpoint means the public API.
    pub fn new(name: impl Into<String>, config: ApiProviderConfig) -> NotificationResult<Self> {
        let api_url = if config.endpoint.is_empty() {
            SENDGRID_API_URL.to_string()
        } else {
            config.endpoint.trim_end_matches('/').to_string()
        };

        Ok(Self {
            name: name.into(),
            health: HealthTracker::new(config.max_emails_per_hour),
            api_url,
            config,
            client: http_client(DEFAULT_SEND_TIMEOUT)?,
        })
    }

    fn request<'a>(&'a self, to: &'a [String], message: &'a Message) -> SendGridRequest<'a> {
        let from = message
            .from
            .as_deref()
            .filter(|from| !from.is_empty())
            .unwrap_or(&self.config.from);

        SendGridRequest {
            personalizations: vec![Personalization {
                to: to.iter().map(|email| EmailAddress { email }).collect(),
            }],
            from: EmailAddress { email: from },
            subject: &message.subject,
            content: vec![
                Content {
                    content_type: "text/plain",
                    value: &message.body,
                },
                Content {
                    content_type: "text/html",
                    value: &message.body,
                },
            ],
        }
    }

    async fn post(&self, request: &SendGridRequest<'_>) -> NotificationResult<()> {
        let response = self
            .client
            .post(format!("{}/mail/send", self.api_url))
            .bearer_auth(&self.config.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_default();
        let error_message = match serde_json::from_str::<SendGridError>(&error_body) {
            Ok(sg_error) => sg_error
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => error_body,
        };

        Err(NotificationError::Send(format!(
            "SendGrid error ({}): {}",
            status, error_message
        )))
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: EmailAddress<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<EmailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send_email(&self, message: &Message) -> NotificationResult<()> {
        debug!(provider = %self.name, to = %message.to, "Sending email via SendGrid");

        let to = [message.to.clone()];
        let result = self.post(&self.request(&to, message)).await;
        match &result {
            Ok(()) => info!(provider = %self.name, to = %message.to, "Email sent via SendGrid"),
            Err(e) => error!(
                provider = %self.name,
                to = %message.to,
                error = %e,
                "Failed to send email via SendGrid"
            ),
        }

        self.health.track(1, result)
    }

    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()> {
        let recipients = message.to.len();
        debug!(provider = %self.name, recipients, "Sending bulk email via SendGrid");

        let template = Message {
            to: String::new(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            from: message.from.clone(),
        };
        let result = self.post(&self.request(&message.to, &template)).await;
        match &result {
            Ok(()) => info!(provider = %self.name, recipients, "Bulk email sent via SendGrid"),
            Err(e) => error!(
                provider = %self.name,
                recipients,
                error = %e,
                "Bulk email via SendGrid failed"
            ),
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
                ("from", !self.config.from.is_empty()),
            ],
        )
    }
}
