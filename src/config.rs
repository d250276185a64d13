use std::time::Duration;

use crate::capacity::RetryCapacityPolicy;
use crate::response::DEFAULT_RESPONSE_METADATA_CACHE_SIZE;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = concat!("sdkcall-rust/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(50);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_MAX_AUTH_RETRIES: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientProfile {
    #[default]
    Standard,
    LowLatency,
}

#[derive(Clone, Debug)]
pub struct ProfileDefaults {
    pub request_timeout: Option<Duration>,
    pub client_execution_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl ClientProfile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Self::Standard => ProfileDefaults {
                request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
                client_execution_timeout: None,
                retry_policy: RetryPolicy::standard(),
            },
            Self::LowLatency => ProfileDefaults {
                request_timeout: Some(Duration::from_secs(2)),
                client_execution_timeout: Some(Duration::from_secs(5)),
                retry_policy: RetryPolicy::low_latency(),
            },
        }
    }
}

/// Client-wide execution settings. Per-call timeouts on the request win over
/// the values here.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub max_error_retry: Option<usize>,
    pub retry_policy: RetryPolicy,
    pub throttled_retries: bool,
    pub retry_capacity_policy: RetryCapacityPolicy,
    pub request_timeout: Option<Duration>,
    pub client_execution_timeout: Option<Duration>,
    pub max_redirects: usize,
    /// Auth-error retries per call before the failure goes to the retry policy.
    pub max_auth_retries: usize,
    pub user_agent: String,
    pub response_metadata_cache_size: usize,
    pub metrics_enabled: bool,
}

impl ClientConfig {
    pub fn from_profile(profile: ClientProfile) -> Self {
        let defaults = profile.defaults();
        Self {
            max_error_retry: None,
            retry_policy: defaults.retry_policy,
            throttled_retries: true,
            retry_capacity_policy: RetryCapacityPolicy::standard(),
            request_timeout: defaults.request_timeout,
            client_execution_timeout: defaults.client_execution_timeout,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_auth_retries: DEFAULT_MAX_AUTH_RETRIES,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            response_metadata_cache_size: DEFAULT_RESPONSE_METADATA_CACHE_SIZE,
            metrics_enabled: true,
        }
    }

    pub fn effective_max_error_retry(&self) -> usize {
        self.retry_policy
            .effective_max_error_retry(self.max_error_retry)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_profile(ClientProfile::Standard)
    }
}
