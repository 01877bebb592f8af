//! Email provider implementations.
//!
//! Every backend implements [`EmailProvider`]. Concrete variants:
//!
//! | Provider            | Kind   | Native bulk          |
//! |---------------------|--------|----------------------|
//! | [`SmtpProvider`]    | `smtp` | no (emulated)        |
//! | [`SendGridProvider`]| `api`  | when `bulk_enabled`  |
//! | [`MailtrapProvider`]| `api`  | when `bulk_enabled`  |
//! | [`GenericApiProvider`] | `api` | when `bulk_enabled` |
//!
//! Providers without native bulk are wrapped in a [`BatchedProvider`] by the
//! registry.

mod batch;
mod generic;
mod health;
mod mailtrap;
pub mod mock;
mod sendgrid;
mod smtp;

pub use batch::{BatchSettings, BatchedProvider};
pub use generic::GenericApiProvider;
pub use health::HealthTracker;
pub use mailtrap::MailtrapProvider;
pub use mock::MockEmailProvider;
pub use sendgrid::SendGridProvider;
pub use smtp::SmtpProvider;

use crate::error::NotificationResult;
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display};

/// Timeout applied to every outbound provider call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
    Smtp,
    Api,
}

/// Static capacity of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub max_emails_per_hour: u32,
    pub max_batch_size: usize,
    pub supports_bulk: bool,
}

/// Point-in-time health and usage of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStats {
    pub emails_sent_last_hour: u32,
    /// Percentage of the hourly cap used, 0-100.
    pub current_load: u32,
    pub healthy: bool,
    pub last_error: Option<String>,
}

/// Uniform send contract over one email backend.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Send one message. Errors are returned, never retried internally.
    async fn send_email(&self, message: &Message) -> NotificationResult<()>;

    /// Send one subject/body pair to many recipients.
    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()>;

    fn supports_bulk(&self) -> bool;

    fn limits(&self) -> ProviderLimits;

    /// Snapshot of health counters. Resets the hourly counter when its
    /// window has elapsed.
    fn stats(&self) -> ProviderStats;

    /// Configured provider name, unique within a registry.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Lower is preferred.
    fn priority(&self) -> i32;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Check that every required field is present.
    fn validate_config(&self) -> NotificationResult<()>;

    fn is_healthy(&self) -> bool {
        self.stats().healthy
    }

    /// Release background resources, flushing anything still queued.
    async fn shutdown(&self) -> NotificationResult<()> {
        Ok(())
    }
}

/// HTTP client shared by the API providers.
pub(crate) fn http_client(timeout: Duration) -> NotificationResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Collects the names of empty required fields into one configuration error.
pub(crate) fn require_fields(
    provider: &str,
    fields: &[(&str, bool)],
) -> NotificationResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(field, _)| *field)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(crate::error::NotificationError::Configuration(format!(
            "provider '{}' is missing required fields: {}",
            provider,
            missing.join(", ")
        )))
    }
}

/// In-process HTTP endpoint recording every JSON request it receives.
#[cfg(test)]
pub(crate) mod test_support {
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::{Json, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub path: String,
        pub authorization: Option<String>,
        pub body: serde_json::Value,
    }

    #[derive(Clone)]
    struct CaptureState {
        status: StatusCode,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    async fn capture(
        State(state): State<CaptureState>,
        uri: Uri,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, &'static str) {
        state.requests.lock().await.push(CapturedRequest {
            path: uri.path().to_string(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        (state.status, "{}")
    }

    /// Start a server answering every request with `status`.
    pub async fn capture_server(status: u16) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = CaptureState {
            status: StatusCode::from_u16(status).unwrap(),
            requests: requests.clone(),
        };
        let app = Router::new().fallback(capture).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_fields_lists_missing() {
        let err = require_fields("office", &[("host", true), ("username", false), ("password", false)])
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("office"));
        assert!(message.contains("username, password"));
        assert!(!message.contains("host"));
    }

    #[test]
    fn test_require_fields_ok() {
        assert!(require_fields("office", &[("host", true)]).is_ok());
    }

    #[test]
    fn test_provider_kind_strings() {
        assert_eq!(ProviderKind::Smtp.to_string(), "smtp");
        assert_eq!(ProviderKind::Api.as_ref(), "api");
    }
}
