use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::capacity::{RetryCapacity, RetryCapacityPolicy};
use crate::clock_skew::ClockOffset;
use crate::config::{ClientConfig, ClientProfile};
use crate::hooks::{Hook, HookPipeline};
use crate::metrics::{ClientMetrics, RequestMetricCollector};
use crate::response::ResponseMetadataCache;
use crate::retry::RetryPolicy;
use crate::signer::{
    AuthErrorRetryStrategy, CredentialsProvider, SignerProvider, StaticSignerProvider,
};
use crate::transport::Transport;

use super::ServiceClient;

pub struct ServiceClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    signer_provider: Arc<dyn SignerProvider>,
    hooks: Vec<Arc<dyn Hook>>,
    auth_error_retry: Option<Arc<dyn AuthErrorRetryStrategy>>,
    clock_offset: ClockOffset,
    metric_collector: Option<Arc<dyn RequestMetricCollector>>,
}

impl ServiceClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
            credentials: None,
            signer_provider: Arc::new(StaticSignerProvider::unsigned()),
            hooks: Vec::new(),
            auth_error_retry: None,
            clock_offset: ClockOffset::new(),
            metric_collector: None,
        }
    }

    /// Replaces timeouts and retry policy with the profile's presets.
    pub fn profile(mut self, profile: ClientProfile) -> Self {
        let defaults = profile.defaults();
        self.config.request_timeout = defaults.request_timeout;
        self.config.client_execution_timeout = defaults.client_execution_timeout;
        self.config.retry_policy = defaults.retry_policy;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_error_retry(mut self, max_error_retry: Option<usize>) -> Self {
        self.config.max_error_retry = max_error_retry;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.config.retry_policy = retry_policy;
        self
    }

    pub fn throttled_retries(mut self, enabled: bool) -> Self {
        self.config.throttled_retries = enabled;
        self
    }

    pub fn retry_capacity_policy(mut self, policy: RetryCapacityPolicy) -> Self {
        self.config.retry_capacity_policy = policy;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = Some(request_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn client_execution_timeout(mut self, client_execution_timeout: Duration) -> Self {
        self.config.client_execution_timeout =
            Some(client_execution_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn max_auth_retries(mut self, max_auth_retries: usize) -> Self {
        self.config.max_auth_retries = max_auth_retries;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn response_metadata_cache_size(mut self, size: usize) -> Self {
        self.config.response_metadata_cache_size = size;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    /// Shares `clock_offset` with this client; clients built from the same
    /// cell converge on one offset.
    pub fn clock_offset(mut self, clock_offset: ClockOffset) -> Self {
        self.clock_offset = clock_offset;
        self
    }

    pub fn metric_collector(mut self, collector: Arc<dyn RequestMetricCollector>) -> Self {
        self.metric_collector = Some(collector);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn signer_provider(mut self, provider: Arc<dyn SignerProvider>) -> Self {
        self.signer_provider = provider;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn auth_error_retry_strategy(mut self, strategy: Arc<dyn AuthErrorRetryStrategy>) -> Self {
        self.auth_error_retry = Some(strategy);
        self
    }

    pub fn build(self) -> crate::Result<ServiceClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let retry_capacity = RetryCapacity::from_policy(
            self.config.throttled_retries,
            self.config.retry_capacity_policy,
        );
        let metadata_cache = ResponseMetadataCache::new(self.config.response_metadata_cache_size);

        Ok(ServiceClient {
            config: self.config,
            transport,
            credentials: self.credentials,
            signer_provider: self.signer_provider,
            hooks: HookPipeline::new(self.hooks),
            auth_error_retry: self.auth_error_retry,
            retry_capacity,
            clock_offset: self.clock_offset,
            metadata_cache,
            metrics: ClientMetrics::default(),
            metric_collector: self.metric_collector,
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Default for ServiceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "ureq-transport")]
fn default_transport() -> crate::Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::transport::UreqTransport::new()))
}

#[cfg(not(feature = "ureq-transport"))]
fn default_transport() -> crate::Result<Arc<dyn Transport>> {
    Err(crate::Error::TransportUnavailable)
}
