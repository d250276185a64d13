//! `sdkcall` is the request-execution engine behind cloud-service SDK clients:
//! signing, redirects, retries with full-jitter backoff, retry admission
//! control and clock-skew correction around a pluggable blocking transport.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use http::Method;
//! use sdkcall::prelude::{
//!     Credentials, JsonErrorResponseHandler, JsonResponseHandler, OriginalRequest,
//!     ServiceClient, StaticCredentialsProvider, WireRequest,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct DescribeInstances {
//!     #[serde(rename = "InstanceCount")]
//!     instance_count: u32,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ServiceClient::builder()
//!         .credentials_provider(Arc::new(StaticCredentialsProvider::new(
//!             Credentials::new("AKID", "SECRET"),
//!         )))
//!         .max_error_retry(Some(3))
//!         .request_timeout(Duration::from_secs(3))
//!         .client_execution_timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     let original = OriginalRequest::new("kec", "DescribeInstances").version("2016-03-04");
//!     let request = WireRequest::parse(original, Method::GET, "https://kec.api.example.com")?
//!         .with_parameter("Action", "DescribeInstances");
//!
//!     let mut context = client.execution_context();
//!     let response = client.execute(
//!         request,
//!         &JsonResponseHandler::<DescribeInstances>::new(),
//!         &JsonErrorResponseHandler::new("kec"),
//!         &mut context,
//!     )?;
//!
//!     println!(
//!         "instances={} request_id={:?} attempts={}",
//!         response.value().instance_count,
//!         response.request_id(),
//!         context.metrics().request_count
//!     );
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Keep throttled retries enabled so one client cannot amplify an outage.
//! - Set a client execution timeout; it also bounds backoff sleeps.
//! - Prefer repeatable bodies (`RequestBody::bytes`, `RequestBody::seekable`)
//!   for calls that must survive retries.

mod body;
mod capacity;
mod client;
mod clock_skew;
mod config;
mod context;
mod error;
mod handler;
mod hooks;
mod metrics;
mod progress;
mod request;
mod response;
mod retry;
mod signer;
pub mod transport;
mod util;

pub use crate::body::{RequestBody, SeekableRead};
pub use crate::capacity::{
    DEFAULT_THROTTLED_RETRIES, DEFAULT_THROTTLED_RETRY_COST, RetryCapacity, RetryCapacityPolicy,
};
pub use crate::client::{
    INVOCATION_ID_HEADER, RETRY_INFO_HEADER, ServiceClient, ServiceClientBuilder,
};
pub use crate::clock_skew::{ClockOffset, compute_offset_seconds, is_clock_skew_error};
pub use crate::config::{
    ClientConfig, ClientProfile, DEFAULT_MAX_AUTH_RETRIES, DEFAULT_MAX_REDIRECTS,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT, ProfileDefaults,
};
pub use crate::context::{CancelHandle, ExecutionContext};
pub use crate::error::{
    BoxError, Error, ErrorCode, ErrorType, ServiceError, TimeoutPhase, TransportError,
    TransportErrorKind,
};
pub use crate::handler::{
    ErrorResponseHandler, HandlerError, JsonErrorResponseHandler, JsonResponseHandler,
    ResponseHandler,
};
pub use crate::hooks::{Hook, HookPipeline};
pub use crate::metrics::{ClientMetricsSnapshot, RequestMetricCollector, RequestMetrics};
pub use crate::progress::{ProgressEvent, ProgressListener};
pub use crate::request::{CloneRootKey, OriginalRequest, WireRequest};
pub use crate::response::{
    DEFAULT_RESPONSE_METADATA_CACHE_SIZE, REQUEST_ID_HEADER, RawResponse, Response, ResponseBody,
    ResponseMetadata, ResponseMetadataCache, ServiceResponse,
};
pub use crate::retry::{
    BackoffStrategy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ERROR_RETRY, DefaultRetryCondition,
    FullJitterBackoff, LOW_LATENCY_BASE_DELAY, MAX_BACKOFF, NoDelay, NoRetryCondition,
    RetryCondition, RetryDecision, RetryPolicy, full_jitter_backoff, full_jitter_ceiling,
};
pub use crate::signer::{
    AuthErrorRetryStrategy, AuthRetryParameters, Credentials, CredentialsProvider, NoOpSigner,
    Signer, SignerProvider, StaticCredentialsProvider, StaticSignerProvider,
};
pub use crate::transport::Transport;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CancelHandle, ClientConfig, ClientProfile, Credentials, CredentialsProvider, Error,
        ErrorCode, ErrorResponseHandler, ExecutionContext, Hook, JsonErrorResponseHandler,
        JsonResponseHandler, OriginalRequest, RequestBody, Response, ResponseHandler,
        RetryPolicy, ServiceClient, ServiceError, Signer, SignerProvider,
        StaticCredentialsProvider, StaticSignerProvider, Transport, WireRequest,
    };
}
