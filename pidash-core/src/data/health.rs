//! Per-provider call bookkeeping.
//!
//! Tracks reachability, last success/failure, and consecutive failures for
//! the status endpoint. This is observability only: nothing here ever blocks
//! a provider call, every request re-attempts the remote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Point-in-time view of a provider's recent history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub reachable: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
}

impl ProviderStatus {
    /// Successes over all attempts, or 0 if nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.total_successes + self.total_failures;
        if attempts == 0 {
            0.0
        } else {
            self.total_successes as f64 / attempts as f64
        }
    }
}

/// Shared, thread-safe status holder for one provider.
#[derive(Debug)]
pub struct ProviderHealth {
    name: String,
    status: Mutex<ProviderStatus>,
}

impl ProviderHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Mutex::new(ProviderStatus::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, ProviderStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful call and reset the consecutive failure counter.
    pub fn record_success(&self) {
        let mut status = self.lock();
        status.reachable = true;
        status.last_success = Some(Utc::now());
        status.consecutive_failures = 0;
        status.total_successes += 1;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut status = self.lock();
        status.last_failure = Some(Utc::now());
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.total_failures += 1;
    }

    /// Record the outcome of a liveness probe.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn snapshot(&self) -> ProviderStatus {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let health = ProviderHealth::new("remote");
        let status = health.snapshot();
        assert!(!status.reachable);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_success.is_none());
        assert_eq!(status.success_rate(), 0.0);
    }

    #[test]
    fn failures_accumulate_until_success() {
        let health = ProviderHealth::new("remote");
        health.record_failure();
        health.record_failure();
        health.record_failure();
        assert_eq!(health.snapshot().consecutive_failures, 3);

        health.record_success();
        let status = health.snapshot();
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_failures, 3);
        assert_eq!(status.total_successes, 1);
        assert!(status.reachable);
        assert!(status.last_failure.is_some());
        assert!((status.success_rate() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn probe_result_overrides_reachability() {
        let health = ProviderHealth::new("remote");
        health.record_success();
        health.set_reachable(false);
        assert!(!health.snapshot().reachable);
        assert!(health.snapshot().last_success.is_some());
    }
}
