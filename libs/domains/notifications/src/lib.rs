//! Notifications Domain
//!
//! Outbound newsletter dispatch: when content is published, every active
//! subscriber of its topic gets an email through one of several providers.
//!
//! # Features
//!
//! - SMTP, generic HTTP API, SendGrid and Mailtrap providers
//! - Micro-batching for providers without a native bulk endpoint
//! - Round robin, weighted and least-load provider selection
//! - Single bulk call for large audiences with automatic fallback
//! - Per-recipient delivery log and a bounded retry sweep
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Scheduler    │  ← Ticks every minute
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   Dispatcher    │  ← Resolves recipients, picks bulk or distributed
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ProviderRegistry │  ← Load balancer over healthy providers
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Email Provider  │  ← SMTP (batched), SendGrid, Mailtrap, generic API
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  Delivery Log   │  ← One record per recipient, retried up to 3 times
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{
//!     Dispatcher, NotificationsConfig, PgContentRepository, PgDeliveryLogRepository,
//!     PgSubscriberRepository, ProviderRegistry, Scheduler,
//! };
//!
//! let config = NotificationsConfig::load("config/default.toml")?;
//! let registry = Arc::new(ProviderRegistry::from_config(&config.providers, &config.worker)?);
//!
//! let dispatcher = Dispatcher::new(
//!     registry.clone(),
//!     Arc::new(PgContentRepository::new(db.clone())),
//!     Arc::new(PgSubscriberRepository::new(db.clone())),
//!     Arc::new(PgDeliveryLogRepository::new(db)),
//!     config.worker,
//! );
//!
//! Scheduler::new(Arc::new(dispatcher)).run(cancel).await;
//! registry.shutdown().await?;
//! ```

pub mod balancer;
pub mod config;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod models;
pub mod postgres;
pub mod providers;
pub mod registry;
pub mod repository;
pub mod scheduler;

pub use balancer::{LeastLoadBalancer, LoadBalancer, RoundRobinBalancer, WeightedBalancer};
pub use config::{
    ApiKind, ApiProviderConfig, DispatchConfig, LoadBalancingStrategy, NotificationsConfig,
    ProvidersConfig, SmtpProviderConfig,
};
pub use dispatcher::{DispatchPath, DispatchSummary, Dispatcher, RetrySummary};
pub use error::{NotificationError, NotificationResult};
pub use models::{
    BulkMessage, ContentId, ContentItem, DeliveryRecord, DeliveryRecordId, DeliveryStatus,
    Message, NewDeliveryRecord, Subscriber, SubscriberId, TopicId,
};
pub use postgres::{PgContentRepository, PgDeliveryLogRepository, PgSubscriberRepository};
pub use providers::EmailProvider;
pub use registry::ProviderRegistry;
pub use repository::{
    ContentRepository, DeliveryLogRepository, InMemoryContentRepository,
    InMemoryDeliveryLogRepository, InMemorySubscriberRepository, SubscriberRepository,
};
pub use scheduler::{Scheduler, TickReport};
