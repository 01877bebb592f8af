//! Periodic driver: dispatches pending content, then sweeps failed deliveries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::NotificationError;

/// Default pause between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted pause between ticks. Tokio intervals cannot be zero.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// What one tick accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub pending: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub retried: usize,
    pub recovered: usize,
}

pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    retry_enabled: bool,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            interval: DEFAULT_TICK_INTERVAL,
            retry_enabled: true,
        }
    }

    /// Intervals below [`MIN_TICK_INTERVAL`] are raised to it.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    /// Turn the retry sweep at the end of each tick on or off.
    pub fn with_retry(mut self, enabled: bool) -> Self {
        self.retry_enabled = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick immediately, then every `interval` until `cancel` fires. A tick
    /// in progress is allowed to observe the cancellation itself.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            retry = self.retry_enabled,
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.tick(&cancel).await;
                    debug!(?report, "Scheduler tick finished");
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Dispatch every pending content item in order, then run the retry
    /// sweep. A failing item is logged and does not stop the others.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        let pending = match self.dispatcher.contents().get_pending_notifications().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to load pending content");
                Vec::new()
            }
        };
        report.pending = pending.len();

        for content_id in pending {
            if cancel.is_cancelled() {
                return report;
            }
            match self.dispatcher.dispatch_content(content_id, cancel).await {
                Ok(_) => report.dispatched += 1,
                Err(NotificationError::Cancelled) => return report,
                Err(e) => {
                    report.failed += 1;
                    error!(content_id, error = %e, "Failed to dispatch content");
                }
            }
        }

        if self.retry_enabled && !cancel.is_cancelled() {
            match self.dispatcher.retry_failed(cancel).await {
                Ok(summary) => {
                    report.retried = summary.attempted;
                    report.recovered = summary.recovered;
                }
                Err(NotificationError::Cancelled) => {}
                Err(e) => warn!(error = %e, "Retry sweep failed"),
            }
        }

        report
    }

    /// One-shot tick outside the loop, for manual triggers.
    pub async fn run_once(&self) -> TickReport {
        self.tick(&CancellationToken::new()).await
    }
}
