use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::hooks::{Hook, HookPipeline};
use crate::metrics::RequestMetrics;
use crate::signer::{
    AuthErrorRetryStrategy, CredentialsProvider, SignerProvider, StaticSignerProvider,
};
use crate::util::lock_unpoisoned;

/// External cancellation for an in-flight call.
///
/// Cancelling wakes a call sleeping between retries; a transport dispatch in
/// progress finishes first, then the call stops at the next boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (cancelled, wakeup) = &*self.inner;
        *lock_unpoisoned(cancelled) = true;
        wakeup.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_unpoisoned(&self.inner.0)
    }

    /// Blocks for `duration` unless cancelled first. Returns `true` when cancelled.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let (cancelled, wakeup) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut guard = lock_unpoisoned(cancelled);
        while !*guard {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match wakeup.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Per-call collaborators and state shared by every attempt of one call.
pub struct ExecutionContext {
    credentials: Option<Arc<dyn CredentialsProvider>>,
    hooks: HookPipeline,
    signer_provider: Arc<dyn SignerProvider>,
    auth_error_retry: Option<Arc<dyn AuthErrorRetryStrategy>>,
    cancel: CancelHandle,
    pub(crate) metrics: RequestMetrics,
    pub(crate) retry_capacity_consumed: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            credentials: None,
            hooks: HookPipeline::default(),
            signer_provider: Arc::new(StaticSignerProvider::unsigned()),
            auth_error_retry: None,
            cancel: CancelHandle::new(),
            metrics: RequestMetrics::default(),
            retry_capacity_consumed: false,
        }
    }

    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks = self.hooks.extended(&[hook]);
        self
    }

    pub fn signer_provider(mut self, provider: Arc<dyn SignerProvider>) -> Self {
        self.signer_provider = provider;
        self
    }

    pub fn auth_error_retry_strategy(mut self, strategy: Arc<dyn AuthErrorRetryStrategy>) -> Self {
        self.auth_error_retry = Some(strategy);
        self
    }

    pub fn cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn hook_pipeline(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    pub fn retry_capacity_consumed(&self) -> bool {
        self.retry_capacity_consumed
    }

    pub fn cancellation(&self) -> &CancelHandle {
        &self.cancel
    }

    pub(crate) fn credentials(&self) -> Option<&Arc<dyn CredentialsProvider>> {
        self.credentials.as_ref()
    }

    pub(crate) fn signers(&self) -> &dyn SignerProvider {
        self.signer_provider.as_ref()
    }

    pub(crate) fn auth_retry_strategy(&self) -> Option<&Arc<dyn AuthErrorRetryStrategy>> {
        self.auth_error_retry.as_ref()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ExecutionContext")
            .field("has_credentials", &self.credentials.is_some())
            .field("hooks", &self.hooks)
            .field("has_auth_error_retry", &self.auth_error_retry.is_some())
            .field("retry_capacity_consumed", &self.retry_capacity_consumed)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::CancelHandle;

    #[test]
    fn sleep_runs_to_completion_without_cancel() {
        let handle = CancelHandle::new();
        let started = Instant::now();
        assert!(!handle.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_wakes_a_sleeping_call() {
        let handle = CancelHandle::new();
        let canceller = handle.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let started = Instant::now();
        assert!(handle.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(handle.is_cancelled());
        worker.join().expect("canceller should not panic");
    }
}
