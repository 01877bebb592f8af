//! Provider for a plain JSON email API.
//!
//! Posts `{from, to, subject, body}` to the configured endpoint with a bearer
//! token. Any 2xx answer counts as delivered.

use super::{
    DEFAULT_SEND_TIMEOUT, EmailProvider, HealthTracker, ProviderKind, ProviderLimits,
    ProviderStats, http_client, require_fields,
};
use crate::config::ApiProviderConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error};

#[derive(Debug, Serialize)]
struct GenericRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
}

pub struct GenericApiProvider {
    name: String,
    config: ApiProviderConfig,
    client: Client,
    health: HealthTracker,
}

impl GenericApiProvider {
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
        let request = GenericRequest {
            from: from.filter(|f| !f.is_empty()).unwrap_or(&self.config.from),
            to,
            subject,
            body,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(NotificationError::Send(format!(
            "API error ({}): {}",
            status, text
        )))
    }
}

#[async_trait]
impl EmailProvider for GenericApiProvider {
    async fn send_email(&self, message: &Message) -> NotificationResult<()> {
        debug!(provider = %self.name, to = %message.to, "Sending email via API");

        let to = [message.to.clone()];
        let result = self
            .post(&to, &message.subject, &message.body, message.from.as_deref())
            .await;
        if let Err(e) = &result {
            error!(provider = %self.name, to = %message.to, error = %e, "API send failed");
        }

        self.health.track(1, result)
    }

    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()> {
        let recipients = message.to.len();
        debug!(provider = %self.name, recipients, "Sending bulk email via API");

        let result = self
            .post(&message.to, &message.subject, &message.body, message.from.as_deref())
            .await;
        if let Err(e) = &result {
            error!(provider = %self.name, recipients, error = %e, "API bulk send failed");
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
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::capture_server;

    fn config(endpoint: String) -> ApiProviderConfig {
        ApiProviderConfig {
            endpoint,
            token: "api-token".to_string(),
            from: "news@example.com".to_string(),
            priority: 4,
            max_emails_per_hour: 200,
            bulk_enabled: true,
            max_batch_size: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_endpoint() {
        let provider = GenericApiProvider::new("internal", config(String::new())).unwrap();
        let err = provider.validate_config().unwrap_err();
        assert!(err.to_string().contains("endpoint"));
        assert!(!err.to_string().contains("token"));
    }

    #[tokio::test]
    async fn test_send_posts_json_with_bearer() {
        let (url, requests) = capture_server(200).await;
        let provider = GenericApiProvider::new("internal", config(format!("{}/send", url))).unwrap();

        provider
            .send_email(&Message::new("reader@example.com", "Hello", "Body"))
            .await
            .unwrap();

        let requests = requests.lock().await;
        assert_eq!(requests[0].path, "/send");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer api-token"));
        assert_eq!(requests[0].body["from"], "news@example.com");
        assert_eq!(requests[0].body["to"][0], "reader@example.com");
        assert_eq!(requests[0].body["subject"], "Hello");
        assert_eq!(requests[0].body["body"], "Body");
    }

    #[tokio::test]
    async fn test_any_success_status_accepted() {
        let (url, _) = capture_server(204).await;
        let provider = GenericApiProvider::new("internal", config(url)).unwrap();

        let bulk = BulkMessage::new(vec!["a@example.com".into(), "b@example.com".into()], "S", "B");
        provider.send_bulk_email(&bulk).await.unwrap();
        assert_eq!(provider.stats().emails_sent_last_hour, 2);
        assert_eq!(provider.stats().current_load, 1);
    }

    #[tokio::test]
    async fn test_server_error_marks_unhealthy() {
        let (url, _) = capture_server(503).await;
        let provider = GenericApiProvider::new("internal", config(url)).unwrap();

        let err = provider
            .send_email(&Message::new("reader@example.com", "S", "B"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
        let stats = provider.stats();
        assert!(!stats.healthy);
        assert!(stats.last_error.unwrap().contains("503"));
    }
}
