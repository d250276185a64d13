use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::capacity::RetryCapacity;
use crate::clock_skew::ClockOffset;
use crate::config::ClientConfig;
use crate::context::ExecutionContext;
use crate::hooks::HookPipeline;
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot, RequestMetricCollector};
use crate::request::OriginalRequest;
use crate::response::{ResponseMetadata, ResponseMetadataCache};
use crate::signer::{AuthErrorRetryStrategy, CredentialsProvider, SignerProvider};
use crate::transport::Transport;

mod attempt;
mod builder;
mod execute;

pub use builder::ServiceClientBuilder;

/// Unique id stamped on every call, shared by all of its attempts.
pub const INVOCATION_ID_HEADER: &str = "x-sdk-invocation-id";
/// Retry bookkeeping sent with every attempt.
pub const RETRY_INFO_HEADER: &str = "x-sdk-retry";

/// Executes service calls against one transport with shared retry capacity,
/// clock offset and response metadata.
///
/// A client is `Send + Sync`; every call runs on the calling thread.
pub struct ServiceClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    signer_provider: Arc<dyn SignerProvider>,
    hooks: HookPipeline,
    auth_error_retry: Option<Arc<dyn AuthErrorRetryStrategy>>,
    retry_capacity: RetryCapacity,
    clock_offset: ClockOffset,
    metadata_cache: ResponseMetadataCache,
    metrics: ClientMetrics,
    metric_collector: Option<Arc<dyn RequestMetricCollector>>,
    shut_down: AtomicBool,
}

impl ServiceClient {
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::new()
    }

    /// Starts a per-call context seeded with the client's credentials,
    /// hooks, signer provider and auth-error retry strategy.
    pub fn execution_context(&self) -> ExecutionContext {
        let mut context = ExecutionContext::new()
            .hooks(self.hooks.clone())
            .signer_provider(Arc::clone(&self.signer_provider));
        if let Some(credentials) = &self.credentials {
            context = context.credentials_provider(Arc::clone(credentials));
        }
        if let Some(strategy) = &self.auth_error_retry {
            context = context.auth_error_retry_strategy(Arc::clone(strategy));
        }
        context
    }

    /// Stops accepting calls and releases the transport. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Metadata of the last successful response for `request` or any clone of it.
    pub fn response_metadata_for(&self, request: &OriginalRequest) -> Option<ResponseMetadata> {
        self.metadata_cache.get(request.clone_root())
    }

    pub fn time_offset(&self) -> i32 {
        self.clock_offset.get()
    }

    pub fn clock_offset(&self) -> &ClockOffset {
        &self.clock_offset
    }

    /// `None` when throttled retries are disabled.
    pub fn available_retry_capacity(&self) -> Option<usize> {
        self.retry_capacity.available_capacity()
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ServiceClient")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .field("retry_capacity", &self.retry_capacity)
            .field("clock_offset", &self.clock_offset.get())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
