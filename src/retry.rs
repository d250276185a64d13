use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;

use crate::error::Error;
use crate::request::OriginalRequest;

pub const DEFAULT_MAX_ERROR_RETRY: usize = 1;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const LOW_LATENCY_BASE_DELAY: Duration = Duration::from_millis(25);
pub const MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Inputs to a retry evaluation after a failed attempt.
#[derive(Clone, Copy, Debug)]
pub struct RetryDecision<'a> {
    pub request: &'a OriginalRequest,
    pub error: &'a Error,
    /// Attempts already sent for this call, including the one that failed.
    pub attempts: usize,
    /// Retries already performed before the failing attempt.
    pub retries_attempted: usize,
    pub body_repeatable: bool,
}

pub trait RetryCondition: Send + Sync {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool;
}

pub trait BackoffStrategy: Send + Sync {
    fn delay_before_next_retry(&self, decision: &RetryDecision<'_>) -> Duration;
}

/// Retries I/O failures plus 5xx, throttling and clock-skew service errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryCondition;

impl RetryCondition for DefaultRetryCondition {
    fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        if !decision.body_repeatable {
            return false;
        }
        if decision.error.is_io() {
            return true;
        }
        decision.error.service_error().is_some_and(|error| {
            error.is_retryable_server_error() || error.is_throttling() || error.is_clock_skew()
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetryCondition;

impl RetryCondition for NoRetryCondition {
    fn should_retry(&self, _decision: &RetryDecision<'_>) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl BackoffStrategy for NoDelay {
    fn delay_before_next_retry(&self, _decision: &RetryDecision<'_>) -> Duration {
        Duration::ZERO
    }
}

/// Exponential backoff with full jitter.
#[derive(Clone, Copy, Debug)]
pub struct FullJitterBackoff {
    base_delay: Duration,
    max_backoff: Duration,
}

impl FullJitterBackoff {
    pub fn new(base_delay: Duration, max_backoff: Duration) -> Self {
        Self {
            base_delay,
            max_backoff: max_backoff.max(base_delay),
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
}

impl Default for FullJitterBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, MAX_BACKOFF)
    }
}

impl BackoffStrategy for FullJitterBackoff {
    fn delay_before_next_retry(&self, decision: &RetryDecision<'_>) -> Duration {
        full_jitter_backoff(decision.attempts, self.base_delay, self.max_backoff)
    }
}

/// Upper bound of the jitter window: `min(base * 2^(attempts - 1), cap)`,
/// zero before any attempt.
pub fn full_jitter_ceiling(attempts: usize, base_delay: Duration, max_backoff: Duration) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let exponent = u32::try_from(attempts - 1).unwrap_or(u32::MAX).min(30);
    let scaled_ms = (base_delay.as_millis() as u64).saturating_mul(1_u64 << exponent);
    Duration::from_millis(scaled_ms).min(max_backoff)
}

pub fn full_jitter_backoff(attempts: usize, base_delay: Duration, max_backoff: Duration) -> Duration {
    let ceiling_ms = full_jitter_ceiling(attempts, base_delay, max_backoff).as_millis() as u64;
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
}

#[derive(Clone)]
pub struct RetryPolicy {
    condition: Arc<dyn RetryCondition>,
    backoff: Arc<dyn BackoffStrategy>,
    max_error_retry: usize,
    honor_client_max_error_retry: bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_error_retry", &self.max_error_retry)
            .field(
                "honor_client_max_error_retry",
                &self.honor_client_max_error_retry,
            )
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(
        condition: Arc<dyn RetryCondition>,
        backoff: Arc<dyn BackoffStrategy>,
        max_error_retry: usize,
        honor_client_max_error_retry: bool,
    ) -> Self {
        Self {
            condition,
            backoff,
            max_error_retry,
            honor_client_max_error_retry,
        }
    }

    pub fn none() -> Self {
        Self::new(Arc::new(NoRetryCondition), Arc::new(NoDelay), 0, false)
    }

    /// Default condition and backoff; defers to the client's max retry count.
    pub fn standard() -> Self {
        Self::new(
            Arc::new(DefaultRetryCondition),
            Arc::new(FullJitterBackoff::default()),
            DEFAULT_MAX_ERROR_RETRY,
            true,
        )
    }

    /// Default condition and backoff with a max retry count that overrides the client's.
    pub fn with_max_retries(max_error_retry: usize) -> Self {
        Self::new(
            Arc::new(DefaultRetryCondition),
            Arc::new(FullJitterBackoff::default()),
            max_error_retry,
            false,
        )
    }

    /// Shorter base delay for latency sensitive services.
    pub fn low_latency() -> Self {
        Self::new(
            Arc::new(DefaultRetryCondition),
            Arc::new(FullJitterBackoff::new(LOW_LATENCY_BASE_DELAY, MAX_BACKOFF)),
            DEFAULT_MAX_ERROR_RETRY,
            true,
        )
    }

    pub fn retry_condition(mut self, condition: Arc<dyn RetryCondition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn backoff_strategy(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_error_retry(&self) -> usize {
        self.max_error_retry
    }

    pub fn honors_client_max_error_retry(&self) -> bool {
        self.honor_client_max_error_retry
    }

    /// The client setting wins when present and honored by this policy.
    pub fn effective_max_error_retry(&self, client_max_error_retry: Option<usize>) -> usize {
        match client_max_error_retry {
            Some(client_max) if self.honor_client_max_error_retry => client_max,
            _ => self.max_error_retry,
        }
    }

    pub fn should_retry(&self, decision: &RetryDecision<'_>) -> bool {
        self.condition.should_retry(decision)
    }

    pub fn delay_before_next_retry(&self, decision: &RetryDecision<'_>) -> Duration {
        self.backoff.delay_before_next_retry(decision)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        DefaultRetryCondition, FullJitterBackoff, RetryCondition, RetryDecision, RetryPolicy,
        full_jitter_backoff, full_jitter_ceiling,
    };
    use crate::error::{Error, ServiceError, TimeoutPhase};
    use crate::request::OriginalRequest;

    fn decision<'a>(
        request: &'a OriginalRequest,
        error: &'a Error,
        body_repeatable: bool,
    ) -> RetryDecision<'a> {
        RetryDecision {
            request,
            error,
            attempts: 1,
            retries_attempted: 0,
            body_repeatable,
        }
    }

    #[test]
    fn backoff_is_zero_before_any_attempt() {
        assert_eq!(
            full_jitter_backoff(0, Duration::from_millis(100), Duration::from_secs(20)),
            Duration::ZERO
        );
    }

    #[test]
    fn backoff_stays_within_full_jitter_window() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(20);
        for attempts in 1..=40 {
            let ceiling = full_jitter_ceiling(attempts, base, cap);
            assert!(ceiling <= cap);
            for _ in 0..20 {
                assert!(full_jitter_backoff(attempts, base, cap) <= ceiling);
            }
        }
        assert_eq!(full_jitter_ceiling(1, base, cap), base);
        assert_eq!(full_jitter_ceiling(3, base, cap), Duration::from_millis(400));
        assert_eq!(full_jitter_ceiling(30, base, cap), cap);
    }

    #[test]
    fn default_condition_follows_precedence() {
        let request = OriginalRequest::new("kec", "RunInstances");
        let condition = DefaultRetryCondition;

        let io_error = Error::Timeout {
            phase: TimeoutPhase::Attempt,
            timeout_ms: 10,
            method: http::Method::GET,
            uri: "https://kec.api.example.com/".to_owned(),
        };
        assert!(condition.should_retry(&decision(&request, &io_error, true)));
        assert!(!condition.should_retry(&decision(&request, &io_error, false)));

        for (status, code, expected) in [
            (503, "ServiceUnavailable", true),
            (400, "Throttling", true),
            (403, "RequestExpired", true),
            (400, "InvalidParameter", false),
            (501, "NotImplemented", false),
        ] {
            let error = Error::from(ServiceError::new(status, code, "failure"));
            assert_eq!(
                condition.should_retry(&decision(&request, &error, true)),
                expected,
                "{status} {code}"
            );
        }
    }

    #[test]
    fn effective_max_respects_honor_flag() {
        assert_eq!(RetryPolicy::standard().effective_max_error_retry(Some(5)), 5);
        assert_eq!(RetryPolicy::standard().effective_max_error_retry(None), 1);
        assert_eq!(
            RetryPolicy::with_max_retries(2).effective_max_error_retry(Some(5)),
            2
        );
        assert_eq!(RetryPolicy::none().effective_max_error_retry(Some(5)), 0);
    }

    #[test]
    fn low_latency_policy_uses_smaller_base() {
        assert_eq!(
            FullJitterBackoff::default().base_delay(),
            Duration::from_millis(100)
        );
        let request = OriginalRequest::new("kec", "DescribeInstances");
        let error = Error::from(ServiceError::new(500, "InternalError", "boom"));
        let mut retry = decision(&request, &error, true);
        retry.attempts = 1;
        for _ in 0..20 {
            assert!(
                RetryPolicy::low_latency().delay_before_next_retry(&retry)
                    <= Duration::from_millis(25)
            );
        }
    }
}
