//! Helper utilities for Sockchain
//!
//! This module provides common utility functions used throughout the application.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::error::Elapsed;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Exponential back-off between retries of a failing operation
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after `failures` consecutive failures
    ///
    /// Zero failures means no delay.
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let factor = self.multiplier.powi(failures.saturating_sub(1).min(64) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// One-shot, level-triggered close flag
///
/// Once triggered it stays triggered; every current and future waiter is
/// released. Used for session close, pipe stop and relay shutdown.
#[derive(Debug, Default)]
pub struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the signal, returning `true` only for the first call
    pub fn trigger(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Whether the signal has been triggered
    pub fn is_triggered(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the signal is triggered
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so a concurrent
            // trigger cannot slip between the check and the await
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// Convert a seconds setting to a timeout, where zero means "no timeout"
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Run `fut` under an optional deadline
pub async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut).await,
        None => Ok(fut.await),
    }
}
