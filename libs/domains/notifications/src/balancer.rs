//! Load-balancing strategies over a set of providers.
//!
//! A [`LoadBalancer`] either selects one provider for a send or partitions a
//! list of `count` items across providers. Partitioning works on indices so
//! callers can keep whatever per-item data they need (recipient ids, records)
//! alongside the messages.
//!
//! None of the strategies fail when every provider is unhealthy. They fall
//! back to a configured provider and let the send itself report the error.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::LoadBalancingStrategy;
use crate::providers::{EmailProvider, ProviderStats};

/// Providers at or above this load percentage are skipped by weighted selection.
pub const WEIGHTED_LOAD_CEILING: u32 = 90;

/// Items assigned to one provider, as indices into the caller's list.
#[derive(Clone)]
pub struct Allocation {
    pub provider: Arc<dyn EmailProvider>,
    pub indices: Vec<usize>,
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("provider", &self.provider.name())
            .field("indices", &self.indices)
            .finish()
    }
}

pub trait LoadBalancer: Send + Sync {
    /// Pick one provider for `email_count` messages. `None` only when
    /// `providers` is empty.
    fn select(
        &self,
        providers: &[Arc<dyn EmailProvider>],
        email_count: usize,
    ) -> Option<Arc<dyn EmailProvider>>;

    /// Assign each of `count` items to exactly one provider.
    fn partition(&self, providers: &[Arc<dyn EmailProvider>], count: usize) -> Vec<Allocation>;

    fn name(&self) -> &'static str;
}

/// Build the balancer for a configured strategy.
pub fn for_strategy(strategy: LoadBalancingStrategy) -> Box<dyn LoadBalancer> {
    match strategy {
        LoadBalancingStrategy::RoundRobin => Box::new(RoundRobinBalancer::default()),
        LoadBalancingStrategy::Weighted => Box::new(WeightedBalancer),
        LoadBalancingStrategy::LeastLoad => Box::new(LeastLoadBalancer),
    }
}

/// Provider paired with one stats sample, so a single decision sees a
/// consistent view.
struct Snapshot<'a> {
    provider: &'a Arc<dyn EmailProvider>,
    stats: ProviderStats,
}

fn snapshot(providers: &[Arc<dyn EmailProvider>]) -> Vec<Snapshot<'_>> {
    providers
        .iter()
        .map(|provider| Snapshot {
            provider,
            stats: provider.stats(),
        })
        .collect()
}

/// Append `indices` to the allocation of `provider`, creating it if needed.
fn assign(allocations: &mut Vec<Allocation>, provider: &Arc<dyn EmailProvider>, indices: Vec<usize>) {
    if indices.is_empty() {
        return;
    }
    match allocations
        .iter_mut()
        .find(|a| Arc::ptr_eq(&a.provider, provider))
    {
        Some(allocation) => allocation.indices.extend(indices),
        None => allocations.push(Allocation {
            provider: Arc::clone(provider),
            indices,
        }),
    }
}

fn everything_to(provider: &Arc<dyn EmailProvider>, count: usize) -> Vec<Allocation> {
    let mut allocations = Vec::new();
    assign(&mut allocations, provider, (0..count).collect());
    allocations
}

// ============================================================================
// Round robin
// ============================================================================

/// Cycles over healthy providers.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(
        &self,
        providers: &[Arc<dyn EmailProvider>],
        _email_count: usize,
    ) -> Option<Arc<dyn EmailProvider>> {
        let first = providers.first()?;
        let healthy: Vec<&Arc<dyn EmailProvider>> =
            providers.iter().filter(|p| p.is_healthy()).collect();
        if healthy.is_empty() {
            return Some(Arc::clone(first));
        }

        let next = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Some(Arc::clone(healthy[next % healthy.len()]))
    }

    fn partition(&self, providers: &[Arc<dyn EmailProvider>], count: usize) -> Vec<Allocation> {
        let Some(first) = providers.first() else {
            return Vec::new();
        };
        if count == 0 {
            return Vec::new();
        }

        let healthy: Vec<&Arc<dyn EmailProvider>> =
            providers.iter().filter(|p| p.is_healthy()).collect();
        if healthy.is_empty() {
            return everything_to(first, count);
        }

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); healthy.len()];
        for index in 0..count {
            buckets[index % healthy.len()].push(index);
        }

        let mut allocations = Vec::with_capacity(healthy.len());
        for (provider, indices) in healthy.into_iter().zip(buckets) {
            assign(&mut allocations, provider, indices);
        }
        allocations
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

// ============================================================================
// Weighted (priority + capacity)
// ============================================================================

/// Prefers low priority numbers while they have hourly headroom.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedBalancer;

fn by_priority(providers: &[Arc<dyn EmailProvider>]) -> Vec<Snapshot<'_>> {
    let mut sorted = snapshot(providers);
    sorted.sort_by_key(|s| s.provider.priority());
    sorted
}

impl LoadBalancer for WeightedBalancer {
    fn select(
        &self,
        providers: &[Arc<dyn EmailProvider>],
        _email_count: usize,
    ) -> Option<Arc<dyn EmailProvider>> {
        let sorted = by_priority(providers);
        let first = sorted.first()?;

        let available = sorted.iter().find(|s| {
            s.stats.healthy
                && s.stats.emails_sent_last_hour < s.provider.limits().max_emails_per_hour
                && s.stats.current_load < WEIGHTED_LOAD_CEILING
        });

        Some(Arc::clone(available.unwrap_or(first).provider))
    }

    fn partition(&self, providers: &[Arc<dyn EmailProvider>], count: usize) -> Vec<Allocation> {
        let sorted = by_priority(providers);
        let Some(first) = sorted.first() else {
            return Vec::new();
        };

        let mut allocations = Vec::new();
        let mut next = 0;
        for s in &sorted {
            if next == count {
                break;
            }
            if !s.stats.healthy {
                continue;
            }

            let headroom = s
                .provider
                .limits()
                .max_emails_per_hour
                .saturating_sub(s.stats.emails_sent_last_hour) as usize;
            if headroom == 0 {
                continue;
            }

            let take = headroom.min(count - next);
            assign(&mut allocations, s.provider, (next..next + take).collect());
            next += take;
        }

        // Everyone is saturated: the overflow lands on the highest priority provider.
        assign(&mut allocations, first.provider, (next..count).collect());
        allocations
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

// ============================================================================
// Least load
// ============================================================================

/// Prefers the healthy provider with the lowest load percentage.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoadBalancer;

impl LoadBalancer for LeastLoadBalancer {
    fn select(
        &self,
        providers: &[Arc<dyn EmailProvider>],
        _email_count: usize,
    ) -> Option<Arc<dyn EmailProvider>> {
        let first = providers.first()?;

        let best = snapshot(providers)
            .into_iter()
            .filter(|s| s.stats.healthy)
            .min_by_key(|s| s.stats.current_load)
            .map(|s| s.provider);

        Some(Arc::clone(best.unwrap_or(first)))
    }

    fn partition(&self, providers: &[Arc<dyn EmailProvider>], count: usize) -> Vec<Allocation> {
        let Some(first) = providers.first() else {
            return Vec::new();
        };
        if count == 0 {
            return Vec::new();
        }

        let mut healthy: Vec<Snapshot<'_>> = snapshot(providers)
            .into_iter()
            .filter(|s| s.stats.healthy)
            .collect();
        if healthy.is_empty() {
            return everything_to(first, count);
        }
        healthy.sort_by_key(|s| s.stats.current_load);

        let share = count / healthy.len();
        let remainder = count % healthy.len();

        let mut allocations = Vec::with_capacity(healthy.len());
        let mut start = 0;
        for (position, s) in healthy.iter().enumerate() {
            let take = share + usize::from(position < remainder);
            assign(&mut allocations, s.provider, (start..start + take).collect());
            start += take;
        }
        allocations
    }

    fn name(&self) -> &'static str {
        "least_load"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockEmailProvider;
    use std::collections::HashMap;

    fn arc(provider: MockEmailProvider) -> Arc<dyn EmailProvider> {
        Arc::new(provider)
    }

    fn counts(allocations: &[Allocation]) -> HashMap<String, usize> {
        allocations
            .iter()
            .map(|a| (a.provider.name().to_string(), a.indices.len()))
            .collect()
    }

    /// Every index in `0..count` appears exactly once.
    fn assert_exact_cover(allocations: &[Allocation], count: usize) {
        let mut seen: Vec<usize> = allocations
            .iter()
            .flat_map(|a| a.indices.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_for_strategy_names() {
        assert_eq!(for_strategy(LoadBalancingStrategy::RoundRobin).name(), "round_robin");
        assert_eq!(for_strategy(LoadBalancingStrategy::Weighted).name(), "weighted");
        assert_eq!(for_strategy(LoadBalancingStrategy::LeastLoad).name(), "least_load");
    }

    #[test]
    fn test_empty_provider_list() {
        for strategy in [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::Weighted,
            LoadBalancingStrategy::LeastLoad,
        ] {
            let balancer = for_strategy(strategy);
            assert!(balancer.select(&[], 1).is_none());
            assert!(balancer.partition(&[], 5).is_empty());
        }
    }

    #[test]
    fn test_round_robin_select_cycles_healthy() {
        let providers = vec![
            arc(MockEmailProvider::new("a")),
            arc(MockEmailProvider::new("b").unhealthy()),
            arc(MockEmailProvider::new("c")),
        ];
        let balancer = RoundRobinBalancer::default();

        let picks: Vec<String> = (0..4)
            .map(|_| balancer.select(&providers, 1).unwrap().name().to_string())
            .collect();
        assert_eq!(picks, vec!["c", "a", "c", "a"]);
    }

    #[test]
    fn test_round_robin_select_falls_back_to_first() {
        let providers = vec![
            arc(MockEmailProvider::new("a").unhealthy()),
            arc(MockEmailProvider::new("b").unhealthy()),
        ];
        let pick = RoundRobinBalancer::default().select(&providers, 1).unwrap();
        assert_eq!(pick.name(), "a");
    }

    #[test]
    fn test_round_robin_partition_is_even() {
        let providers = vec![
            arc(MockEmailProvider::new("a")),
            arc(MockEmailProvider::new("b")),
            arc(MockEmailProvider::new("c")),
        ];

        for count in [1, 2, 7, 15, 100] {
            let allocations = RoundRobinBalancer::default().partition(&providers, count);
            assert_exact_cover(&allocations, count);

            let sizes: Vec<usize> = allocations.iter().map(|a| a.indices.len()).collect();
            let max = sizes.iter().max().copied().unwrap_or(0);
            let min = if allocations.len() < providers.len() {
                0
            } else {
                sizes.iter().min().copied().unwrap_or(0)
            };
            assert!(max - min <= 1, "count {count}: sizes {sizes:?}");
        }
    }

    #[test]
    fn test_round_robin_partition_skips_unhealthy() {
        let providers = vec![
            arc(MockEmailProvider::new("a")),
            arc(MockEmailProvider::new("b").unhealthy()),
        ];
        let allocations = RoundRobinBalancer::default().partition(&providers, 4);
        assert_eq!(counts(&allocations), HashMap::from([("a".to_string(), 4)]));
    }

    #[test]
    fn test_round_robin_partition_without_healthy_uses_first() {
        let providers = vec![
            arc(MockEmailProvider::new("a").unhealthy()),
            arc(MockEmailProvider::new("b").unhealthy()),
        ];
        let allocations = RoundRobinBalancer::default().partition(&providers, 3);
        assert_eq!(counts(&allocations), HashMap::from([("a".to_string(), 3)]));
    }

    #[test]
    fn test_weighted_select_prefers_priority_with_headroom() {
        let providers = vec![
            arc(MockEmailProvider::new("backup").with_priority(2)),
            arc(MockEmailProvider::new("primary").with_priority(1)),
        ];
        let pick = WeightedBalancer.select(&providers, 1).unwrap();
        assert_eq!(pick.name(), "primary");
    }

    #[test]
    fn test_weighted_select_skips_overloaded() {
        let providers = vec![
            arc(MockEmailProvider::new("primary")
                .with_priority(1)
                .with_hourly_limit(100)
                .with_sent(90)),
            arc(MockEmailProvider::new("backup").with_priority(2)),
        ];
        let pick = WeightedBalancer.select(&providers, 1).unwrap();
        assert_eq!(pick.name(), "backup");
    }

    #[test]
    fn test_weighted_select_falls_back_to_top_priority() {
        let providers = vec![
            arc(MockEmailProvider::new("backup").with_priority(2).unhealthy()),
            arc(MockEmailProvider::new("primary")
                .with_priority(1)
                .with_hourly_limit(10)
                .with_sent(10)),
        ];
        let pick = WeightedBalancer.select(&providers, 1).unwrap();
        assert_eq!(pick.name(), "primary");
    }

    #[test]
    fn test_weighted_partition_respects_headroom() {
        let providers = vec![
            arc(MockEmailProvider::new("primary")
                .with_priority(1)
                .with_hourly_limit(10)
                .with_sent(6)),
            arc(MockEmailProvider::new("backup")
                .with_priority(2)
                .with_hourly_limit(5)),
            arc(MockEmailProvider::new("spare")
                .with_priority(3)
                .with_hourly_limit(100)),
        ];

        let allocations = WeightedBalancer.partition(&providers, 12);
        assert_exact_cover(&allocations, 12);
        let counts = counts(&allocations);
        assert_eq!(counts["primary"], 4);
        assert_eq!(counts["backup"], 5);
        assert_eq!(counts["spare"], 3);

        // Priority order keeps index ranges contiguous.
        assert_eq!(allocations[0].indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_weighted_partition_overflow_goes_to_top_priority() {
        let providers = vec![
            arc(MockEmailProvider::new("backup")
                .with_priority(2)
                .with_hourly_limit(3)),
            arc(MockEmailProvider::new("primary")
                .with_priority(1)
                .with_hourly_limit(2)),
        ];

        let allocations = WeightedBalancer.partition(&providers, 10);
        assert_exact_cover(&allocations, 10);
        let counts = counts(&allocations);
        assert_eq!(counts["backup"], 3);
        assert_eq!(counts["primary"], 7);
    }

    #[test]
    fn test_weighted_partition_skips_unhealthy_and_full() {
        let providers = vec![
            arc(MockEmailProvider::new("primary").with_priority(1).unhealthy()),
            arc(MockEmailProvider::new("full")
                .with_priority(2)
                .with_hourly_limit(5)
                .with_sent(5)),
            arc(MockEmailProvider::new("spare").with_priority(3)),
        ];

        let allocations = WeightedBalancer.partition(&providers, 6);
        assert_eq!(counts(&allocations), HashMap::from([("spare".to_string(), 6)]));
    }

    #[test]
    fn test_least_load_select() {
        let providers = vec![
            arc(MockEmailProvider::new("busy").with_hourly_limit(100).with_sent(50)),
            arc(MockEmailProvider::new("idle-but-down").unhealthy()),
            arc(MockEmailProvider::new("quiet").with_hourly_limit(100).with_sent(10)),
        ];
        let pick = LeastLoadBalancer.select(&providers, 1).unwrap();
        assert_eq!(pick.name(), "quiet");
    }

    #[test]
    fn test_least_load_select_falls_back_to_first() {
        let providers = vec![
            arc(MockEmailProvider::new("a").unhealthy()),
            arc(MockEmailProvider::new("b").unhealthy()),
        ];
        assert_eq!(LeastLoadBalancer.select(&providers, 1).unwrap().name(), "a");
    }

    #[test]
    fn test_least_load_partition_gives_remainder_to_least_loaded() {
        let providers = vec![
            arc(MockEmailProvider::new("busy").with_hourly_limit(100).with_sent(60)),
            arc(MockEmailProvider::new("quiet").with_hourly_limit(100).with_sent(5)),
            arc(MockEmailProvider::new("medium").with_hourly_limit(100).with_sent(30)),
        ];

        let allocations = LeastLoadBalancer.partition(&providers, 11);
        assert_exact_cover(&allocations, 11);
        let counts = counts(&allocations);
        assert_eq!(counts["quiet"], 4);
        assert_eq!(counts["medium"], 4);
        assert_eq!(counts["busy"], 3);
    }

    #[test]
    fn test_least_load_partition_only_uses_healthy() {
        let providers = vec![
            arc(MockEmailProvider::new("down").unhealthy()),
            arc(MockEmailProvider::new("a")),
            arc(MockEmailProvider::new("b")),
        ];

        let allocations = LeastLoadBalancer.partition(&providers, 5);
        assert_exact_cover(&allocations, 5);
        let counts = counts(&allocations);
        assert!(!counts.contains_key("down"));
        assert_eq!(counts.values().sum::<usize>(), 5);
    }
}
