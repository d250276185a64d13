use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default)]
pub struct ClientMetricsSnapshot {
    pub calls_started: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub redirects: u64,
    pub throttle_errors: u64,
    pub clock_skew_corrections: u64,
    pub capacity_acquire_failures: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Arc<ClientMetricsInner>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    calls_started: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    redirects: AtomicU64,
    throttle_errors: AtomicU64,
    clock_skew_corrections: AtomicU64,
    capacity_acquire_failures: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: ClientMetrics,
}

impl ClientMetrics {
    pub(crate) fn record_call_started(&self) {
        self.inner.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.inner.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttle_error(&self) {
        self.inner.throttle_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_clock_skew_correction(&self) {
        self.inner
            .clock_skew_corrections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capacity_acquire_failure(&self) {
        self.inner
            .capacity_acquire_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_call_completed<T>(
        &self,
        result: &Result<T, Error>,
        status: Option<u16>,
        latency: Duration,
    ) {
        self.record_latency(latency);
        match result {
            Ok(_) => {
                self.inner.calls_succeeded.fetch_add(1, Ordering::Relaxed);
                if let Some(status) = status {
                    self.add_status_count(status);
                }
            }
            Err(error) => {
                self.inner.calls_failed.fetch_add(1, Ordering::Relaxed);
                if let Some(status) = error.status() {
                    self.add_status_count(status);
                }
                let key = match error.service_error() {
                    Some(service_error) => format!("service:{}", service_error.error_code),
                    None => error.code().as_str().to_owned(),
                };
                self.add_error_count(key);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ClientMetricsSnapshot {
            calls_started: self.inner.calls_started.load(Ordering::Relaxed),
            calls_succeeded: self.inner.calls_succeeded.load(Ordering::Relaxed),
            calls_failed: self.inner.calls_failed.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            redirects: self.inner.redirects.load(Ordering::Relaxed),
            throttle_errors: self.inner.throttle_errors.load(Ordering::Relaxed),
            clock_skew_corrections: self.inner.clock_skew_corrections.load(Ordering::Relaxed),
            capacity_acquire_failures: self
                .inner
                .capacity_acquire_failures
                .load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: String) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per-call counters and timers, handed to a [`RequestMetricCollector`] when
/// the call ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMetrics {
    pub service_name: String,
    pub action: String,
    pub request_count: u64,
    pub retry_pause_time: Duration,
    pub credentials_request_time: Duration,
    pub signing_time: Duration,
    pub response_processing_time: Duration,
    pub http_request_time: Duration,
    pub throttle_exception_count: u64,
    pub retry_capacity_consumed: u64,
    pub exception_count: u64,
    pub status_code: Option<u16>,
    pub client_execute_time: Duration,
}

impl RequestMetrics {
    pub(crate) fn new(service_name: &str, action: &str) -> Self {
        Self {
            service_name: service_name.to_owned(),
            action: action.to_owned(),
            ..Self::default()
        }
    }

    /// Runs `operation` and adds its wall time to the field chosen by `timer`.
    pub(crate) fn time<R>(
        &mut self,
        timer: fn(&mut Self) -> &mut Duration,
        operation: impl FnOnce() -> R,
    ) -> R {
        let started = Instant::now();
        let result = operation();
        *timer(self) += started.elapsed();
        result
    }
}

pub trait RequestMetricCollector: Send + Sync {
    fn collect(&self, metrics: &RequestMetrics);
}

impl<F> RequestMetricCollector for F
where
    F: Fn(&RequestMetrics) + Send + Sync,
{
    fn collect(&self, metrics: &RequestMetrics) {
        self(metrics)
    }
}
