//! SMTP email provider implementation using lettre.
//!
//! SMTP has no native bulk send. `send_bulk_email` loops over recipients and
//! accepts the batch when at least half of them succeeded.

use super::{
    DEFAULT_SEND_TIMEOUT, EmailProvider, HealthTracker, ProviderKind, ProviderLimits,
    ProviderStats, require_fields,
};
use crate::config::SmtpProviderConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{BulkMessage, Message};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, error, info, warn};

/// Hourly cap used when the configuration leaves it at zero.
const DEFAULT_MAX_EMAILS_PER_HOUR: u32 = 1000;

/// An emulated bulk send is accepted once `1 / BULK_ACCEPTANCE_DIVISOR` of
/// its recipients succeeded, i.e. half of them.
pub(crate) const BULK_ACCEPTANCE_DIVISOR: usize = 2;

/// Decide whether an emulated bulk send counts as delivered.
///
/// The batch is accepted when `succeeded >= total / BULK_ACCEPTANCE_DIVISOR`
/// (integer division).
pub(crate) fn bulk_outcome(
    succeeded: usize,
    total: usize,
    last_error: Option<&NotificationError>,
) -> NotificationResult<()> {
    if succeeded < total / BULK_ACCEPTANCE_DIVISOR {
        let last = last_error.map(ToString::to_string).unwrap_or_default();
        return Err(NotificationError::Send(format!(
            "bulk email failed: {}/{} succeeded, last error: {}",
            succeeded, total, last
        )));
    }
    Ok(())
}

/// SMTP email provider.
pub struct SmtpProvider {
    name: String,
    config: SmtpProviderConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    health: HealthTracker,
}

impl SmtpProvider {
    /// Create a new SMTP provider. Fails with a configuration error when a
    /// required field is missing.
    pub fn new(name: impl Into<String>, config: SmtpProviderConfig) -> NotificationResult<Self> {
        let name = name.into();
        Self::validate(&name, &config)?;

        let transport = Self::build_transport(&config)?;
        let max_per_hour = if config.max_emails_per_hour == 0 {
            DEFAULT_MAX_EMAILS_PER_HOUR
        } else {
            config.max_emails_per_hour
        };

        Ok(Self {
            name,
            config,
            transport,
            health: HealthTracker::new(max_per_hour),
        })
    }

    fn validate(name: &str, config: &SmtpProviderConfig) -> NotificationResult<()> {
        require_fields(
            name,
            &[
                ("host", !config.host.is_empty()),
                ("port", config.port > 0),
                ("username", !config.username.is_empty()),
                ("password", !config.password.is_empty()),
            ],
        )
    }

    fn build_transport(
        config: &SmtpProviderConfig,
    ) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let transport = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| {
                    NotificationError::Configuration(format!(
                        "Failed to create SMTP relay for {}: {}",
                        config.host, e
                    ))
                })?
                .port(config.port)
                .credentials(credentials)
                .timeout(Some(DEFAULT_SEND_TIMEOUT))
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .credentials(credentials)
                .timeout(Some(DEFAULT_SEND_TIMEOUT))
                .build()
        };

        Ok(transport)
    }

    /// Sender address: message override, then configured `from`, then username.
    fn sender<'a>(&'a self, message: &'a Message) -> &'a str {
        message
            .from
            .as_deref()
            .filter(|from| !from.is_empty())
            .or_else(|| Some(self.config.from.as_str()).filter(|from| !from.is_empty()))
            .unwrap_or(self.config.username.as_str())
    }

    fn build_message(&self, message: &Message) -> NotificationResult<lettre::Message> {
        let from: Mailbox = self.sender(message).parse()?;
        let to: Mailbox = message.to.parse()?;

        Ok(lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())?)
    }

    async fn deliver(&self, message: &Message) -> NotificationResult<()> {
        let email = self.build_message(message)?;
        self.transport.send(email).await?;
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send_email(&self, message: &Message) -> NotificationResult<()> {
        debug!(
            provider = %self.name,
            to = %message.to,
            host = %self.config.host,
            port = self.config.port,
            "Sending email via SMTP"
        );

        let result = self.deliver(message).await;
        match &result {
            Ok(()) => info!(provider = %self.name, to = %message.to, "Email sent via SMTP"),
            Err(e) => error!(
                provider = %self.name,
                to = %message.to,
                error = %e,
                "Failed to send email via SMTP"
            ),
        }

        self.health.track(1, result)
    }

    async fn send_bulk_email(&self, message: &BulkMessage) -> NotificationResult<()> {
        let total = message.to.len();
        let mut succeeded = 0;
        let mut last_error = None;

        for single in message.messages() {
            match self.send_email(&single).await {
                Ok(()) => succeeded += 1,
                Err(e) => last_error = Some(e),
            }
        }

        if succeeded < total {
            warn!(
                provider = %self.name,
                succeeded,
                total,
                "Emulated SMTP bulk send had failures"
            );
        }

        bulk_outcome(succeeded, total, last_error.as_ref())
    }

    fn supports_bulk(&self) -> bool {
        false
    }

    fn limits(&self) -> ProviderLimits {
        ProviderLimits {
            max_emails_per_hour: self.health.max_per_hour(),
            max_batch_size: 1,
            supports_bulk: false,
        }
    }

    fn stats(&self) -> ProviderStats {
        self.health.stats()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Smtp
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    fn validate_config(&self) -> NotificationResult<()> {
        Self::validate(&self.name, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpProviderConfig {
        SmtpProviderConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "mailer@example.com".to_string(),
            password: "secret".to_string(),
            from: "news@example.com".to_string(),
            priority: 2,
            max_emails_per_hour: 0,
            use_tls: false,
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = SmtpProvider::new(
            "office",
            SmtpProviderConfig {
                host: String::new(),
                password: String::new(),
                ..config()
            },
        )
        .err()
        .unwrap();

        assert!(matches!(err, NotificationError::Configuration(_)));
        assert!(err.to_string().contains("host"));
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let result = SmtpProvider::new("office", SmtpProviderConfig { port: 0, ..config() });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_limits_and_descriptor() {
        let provider = SmtpProvider::new("office", config()).unwrap();

        assert_eq!(provider.name(), "office");
        assert_eq!(provider.kind(), ProviderKind::Smtp);
        assert_eq!(provider.priority(), 2);
        assert!(!provider.supports_bulk());
        assert!(provider.validate_config().is_ok());

        let limits = provider.limits();
        assert_eq!(limits.max_emails_per_hour, DEFAULT_MAX_EMAILS_PER_HOUR);
        assert_eq!(limits.max_batch_size, 1);
        assert!(!limits.supports_bulk);
    }

    #[tokio::test]
    async fn test_sender_fallback_order() {
        let provider = SmtpProvider::new("office", config()).unwrap();

        let message = Message::new("r@example.com", "S", "B");
        assert_eq!(provider.sender(&message), "news@example.com");

        let message = Message::new("r@example.com", "S", "B").with_from("editor@example.com");
        assert_eq!(provider.sender(&message), "editor@example.com");

        let provider = SmtpProvider::new(
            "office",
            SmtpProviderConfig {
                from: String::new(),
                ..config()
            },
        )
        .unwrap();
        assert_eq!(
            provider.sender(&Message::new("r@example.com", "S", "B")),
            "mailer@example.com"
        );
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_send_error() {
        let provider = SmtpProvider::new("office", config()).unwrap();

        let err = provider
            .send_email(&Message::new("not an address", "S", "B"))
            .await
            .unwrap_err();

        assert!(matches!(err, NotificationError::Send(_)));
        assert!(!provider.is_healthy());
        assert_eq!(provider.stats().emails_sent_last_hour, 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_marks_unhealthy() {
        let provider = SmtpProvider::new("office", config()).unwrap();

        let result = provider
            .send_email(&Message::new("r@example.com", "S", "B"))
            .await;

        assert!(result.is_err());
        let stats = provider.stats();
        assert!(!stats.healthy);
        assert!(stats.last_error.is_some());
    }

    #[test]
    fn test_bulk_outcome_accepts_half() {
        assert!(bulk_outcome(5, 10, None).is_ok());
        assert!(bulk_outcome(2, 5, None).is_ok());
        assert!(bulk_outcome(0, 0, None).is_ok());
    }

    #[test]
    fn test_bulk_acceptance_threshold_is_half() {
        assert_eq!(BULK_ACCEPTANCE_DIVISOR, 2);
        let total = 20;
        assert!(bulk_outcome(total / BULK_ACCEPTANCE_DIVISOR, total, None).is_ok());
        assert!(bulk_outcome(total / BULK_ACCEPTANCE_DIVISOR - 1, total, None).is_err());
    }

    #[test]
    fn test_bulk_outcome_rejects_below_half() {
        let last = NotificationError::Send("mailbox full".into());
        let err = bulk_outcome(4, 10, Some(&last)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Send failed: bulk email failed: 4/10 succeeded, last error: Send failed: mailbox full"
        );
    }
}
