//! Provider registry: builds the configured providers and owns the balancer.

use std::sync::Arc;

use tracing::{info, warn};

use crate::balancer::{self, LoadBalancer};
use crate::config::{ApiKind, ApiProviderConfig, DispatchConfig, LoadBalancingStrategy, ProvidersConfig};
use crate::error::{NotificationError, NotificationResult};
use crate::providers::{
    BatchSettings, BatchedProvider, EmailProvider, GenericApiProvider, MailtrapProvider,
    SendGridProvider, SmtpProvider,
};

/// The set of live providers plus the strategy used to spread work over them.
///
/// Built once at startup and shared for the life of the process. Call
/// [`ProviderRegistry::shutdown`] before exit so batched messages are flushed.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn EmailProvider>>,
    balancer: Box<dyn LoadBalancer>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("strategy", &self.balancer.name())
            .finish()
    }
}

fn build_api_provider(
    name: &str,
    config: &ApiProviderConfig,
) -> NotificationResult<Arc<dyn EmailProvider>> {
    let provider: Arc<dyn EmailProvider> = match config.kind {
        ApiKind::Generic => Arc::new(GenericApiProvider::new(name, config.clone())?),
        ApiKind::Sendgrid => Arc::new(SendGridProvider::new(name, config.clone())?),
        ApiKind::Mailtrap => Arc::new(MailtrapProvider::new(name, config.clone())?),
    };
    Ok(provider)
}

impl ProviderRegistry {
    /// Use an explicit provider set.
    pub fn new(providers: Vec<Arc<dyn EmailProvider>>, strategy: LoadBalancingStrategy) -> Self {
        Self {
            providers,
            balancer: balancer::for_strategy(strategy),
        }
    }

    /// Build every enabled provider in configured order.
    ///
    /// Names are resolved against the SMTP map first, then the API map.
    /// Unknown names and providers with invalid configuration are skipped
    /// with a warning. Providers without bulk support are wrapped in a
    /// [`BatchedProvider`]. Must run inside a Tokio runtime.
    pub fn from_config(
        providers: &ProvidersConfig,
        dispatch: &DispatchConfig,
    ) -> NotificationResult<Self> {
        let mut built: Vec<Arc<dyn EmailProvider>> = Vec::new();

        for name in &providers.enabled {
            let provider = if let Some(smtp) = providers.smtp.get(name) {
                SmtpProvider::new(name.as_str(), smtp.clone())
                    .map(|p| Arc::new(p) as Arc<dyn EmailProvider>)
            } else if let Some(api) = providers.api.get(name) {
                build_api_provider(name, api)
            } else {
                warn!(provider = %name, "Enabled provider has no configuration, skipping");
                continue;
            };

            let provider = match provider.and_then(|p| p.validate_config().map(|()| p)) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider configuration invalid, skipping");
                    continue;
                }
            };

            let provider = if provider.supports_bulk() {
                provider
            } else {
                let settings = BatchSettings::for_provider(provider.as_ref(), dispatch);
                Arc::new(BatchedProvider::new(provider, settings)?) as Arc<dyn EmailProvider>
            };

            info!(
                provider = %provider.name(),
                kind = %provider.kind(),
                priority = provider.priority(),
                bulk = provider.supports_bulk(),
                "Email provider registered"
            );
            built.push(provider);
        }

        if built.is_empty() {
            return Err(NotificationError::NoProviders(
                "no enabled email providers configured".to_string(),
            ));
        }

        let registry = Self::new(built, providers.load_balancing);
        info!(
            providers = registry.providers.len(),
            strategy = registry.strategy_name(),
            "Provider registry ready"
        );
        Ok(registry)
    }

    pub fn providers(&self) -> &[Arc<dyn EmailProvider>] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn healthy_providers(&self) -> Vec<Arc<dyn EmailProvider>> {
        self.providers
            .iter()
            .filter(|p| p.is_healthy())
            .cloned()
            .collect()
    }

    /// Providers with a native bulk path, healthy or not.
    pub fn bulk_capable_providers(&self) -> Vec<Arc<dyn EmailProvider>> {
        self.providers
            .iter()
            .filter(|p| p.supports_bulk())
            .cloned()
            .collect()
    }

    /// Healthy bulk provider with the lowest priority number. Ties keep
    /// configured order.
    pub fn preferred_bulk_provider(&self) -> Option<Arc<dyn EmailProvider>> {
        self.providers
            .iter()
            .filter(|p| p.supports_bulk() && p.is_healthy())
            .min_by_key(|p| p.priority())
            .cloned()
    }

    /// Pick one provider for `email_count` messages.
    pub fn select(&self, email_count: usize) -> Option<Arc<dyn EmailProvider>> {
        self.balancer.select(&self.providers, email_count)
    }

    /// Split `items` across providers with the configured strategy. Every
    /// item ends up in exactly one group.
    pub fn distribute<T>(&self, items: Vec<T>) -> Vec<(Arc<dyn EmailProvider>, Vec<T>)> {
        let allocations = self.balancer.partition(&self.providers, items.len());
        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();

        allocations
            .into_iter()
            .map(|allocation| {
                let group = allocation
                    .indices
                    .iter()
                    .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
                    .collect();
                (allocation.provider, group)
            })
            .collect()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.balancer.name()
    }

    /// Stop every provider, flushing batched messages. Keeps going after a
    /// failure and returns the last error.
    pub async fn shutdown(&self) -> NotificationResult<()> {
        let mut result = Ok(());
        for provider in &self.providers {
            if let Err(e) = provider.shutdown().await {
                warn!(provider = %provider.name(), error = %e, "Provider shutdown failed");
                result = Err(e);
            }
        }
        info!("Provider registry shut down");
        result
    }
}
