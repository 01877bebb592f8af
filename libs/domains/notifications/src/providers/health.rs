//! Per-provider health and hourly usage counters.
//!
//! Health is binary: one failed attempt marks the provider unhealthy and the
//! next successful attempt marks it healthy again. The hourly counter is
//! reset lazily when stats are read after the window has elapsed, so load
//! can be stale between samples.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::ProviderStats;
use crate::error::NotificationResult;

const HOUR: Duration = Duration::from_secs(3600);

/// Lock-free counters owned by one provider instance.
#[derive(Debug)]
pub struct HealthTracker {
    max_per_hour: u32,
    window: Duration,
    epoch: Instant,
    window_start_ms: AtomicU64,
    sent: AtomicU32,
    healthy: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl HealthTracker {
    /// Tracker with a one hour window.
    pub fn new(max_per_hour: u32) -> Self {
        Self::with_window(max_per_hour, HOUR)
    }

    /// Tracker with a custom counter window.
    pub fn with_window(max_per_hour: u32, window: Duration) -> Self {
        Self {
            max_per_hour,
            window,
            epoch: Instant::now(),
            window_start_ms: AtomicU64::new(0),
            sent: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    pub fn record_success(&self, attempts: u32) {
        self.sent.fetch_add(attempts, Ordering::AcqRel);
        self.healthy.store(true, Ordering::Release);
    }

    pub fn record_failure(&self, attempts: u32, error: &str) {
        self.sent.fetch_add(attempts, Ordering::AcqRel);
        self.healthy.store(false, Ordering::Release);
        match self.last_error.write() {
            Ok(mut guard) => *guard = Some(error.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(error.to_string()),
        }
    }

    /// Record the outcome of `attempts` deliveries and pass the result through.
    pub fn track<T>(&self, attempts: u32, result: NotificationResult<T>) -> NotificationResult<T> {
        match &result {
            Ok(_) => self.record_success(attempts),
            Err(e) => self.record_failure(attempts, &e.to_string()),
        }
        result
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ProviderStats {
        self.roll_window();

        let sent = self.sent.load(Ordering::Acquire);
        let current_load = if self.max_per_hour > 0 {
            ((u64::from(sent) * 100) / u64::from(self.max_per_hour)).min(100) as u32
        } else {
            0
        };
        let last_error = match self.last_error.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        ProviderStats {
            emails_sent_last_hour: sent,
            current_load,
            healthy: self.is_healthy(),
            last_error,
        }
    }

    fn roll_window(&self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let start_ms = self.window_start_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(start_ms) <= self.window.as_millis() as u64 {
            return;
        }
        // Only the caller that wins the swap clears the counter.
        if self
            .window_start_ms
            .compare_exchange(start_ms, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.sent.store(0, Ordering::Release);
        }
    }
}
