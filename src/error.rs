use http::{Method, StatusCode};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const THROTTLING_ERROR_CODES: [&str; 9] = [
    "Throttling",
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "SlowDown",
    "TooManyRequestsException",
    "LimitExceededException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "RequestThrottled",
];

const CLOCK_SKEW_ERROR_CODES: [&str; 6] = [
    "RequestTimeTooSkewed",
    "RequestExpired",
    "InvalidSignatureException",
    "SignatureDoesNotMatch",
    "AuthFailure",
    "RequestInTheFuture",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeoutPhase {
    /// A single transport round-trip ran out of time; the call may still retry.
    Attempt,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("attempt")
    }
}

/// Failure reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport {kind} error: {source}")]
    Io {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("transport call timed out")]
    Timeout,
}

impl TransportError {
    pub fn io(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::Io {
            kind,
            source: source.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(source: std::io::Error) -> Self {
        let kind = match source.kind() {
            std::io::ErrorKind::TimedOut => return Self::Timeout,
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        };
        Self::io(kind, source)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorType {
    Client,
    Service,
    #[default]
    Unknown,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Client => "Client",
            Self::Service => "Service",
            Self::Unknown => "Unknown",
        };
        formatter.write_str(text)
    }
}

/// Structured failure decoded from a non-2xx service response.
#[derive(Clone, Debug, Error)]
#[error(
    "{message} (Service: {service_name}; Status Code: {status}; Error Code: {error_code}; Request ID: {})",
    .request_id.as_deref().unwrap_or("none")
)]
pub struct ServiceError {
    pub service_name: String,
    pub status: u16,
    pub error_code: String,
    pub error_type: ErrorType,
    pub request_id: Option<String>,
    pub message: String,
}

impl ServiceError {
    pub fn new(status: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service_name: String::new(),
            status,
            error_code: error_code.into(),
            error_type: ErrorType::Unknown,
            request_id: None,
            message: message.into(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// 500, 502, 503 and 504 are treated as transient server-side failures.
    pub fn is_retryable_server_error(&self) -> bool {
        matches!(
            StatusCode::from_u16(self.status),
            Ok(StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT)
        )
    }

    pub fn is_throttling(&self) -> bool {
        THROTTLING_ERROR_CODES.contains(&self.error_code.as_str())
    }

    pub fn is_clock_skew(&self) -> bool {
        CLOCK_SKEW_ERROR_CODES.contains(&self.error_code.as_str())
    }

    pub fn is_request_entity_too_large(&self) -> bool {
        self.status == StatusCode::PAYLOAD_TOO_LARGE.as_u16()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    Credentials,
    Signing,
    Transport,
    Timeout,
    DeadlineExceeded,
    Interrupted,
    ReadBody,
    Service,
    StreamReset,
    Unmarshall,
    RedirectLimitExceeded,
    ClientShutdown,
    TransportUnavailable,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Credentials => "credentials",
            Self::Signing => "signing",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Interrupted => "interrupted",
            Self::ReadBody => "read_body",
            Self::Service => "service",
            Self::StreamReset => "stream_reset",
            Self::Unmarshall => "unmarshall",
            Self::RedirectLimitExceeded => "redirect_limit_exceeded",
            Self::ClientShutdown => "client_shutdown",
            Self::TransportUnavailable => "transport_unavailable",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("unable to load credentials: {source}")]
    Credentials {
        #[source]
        source: BoxError,
    },
    #[error("unable to sign request for {method} {uri}: {source}")]
    Signing {
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("unable to execute http request ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out in {phase} after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        phase: TimeoutPhase,
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("client execution timed out after {timeout_ms}ms for {method} {uri}")]
    DeadlineExceeded {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("call was cancelled for {method} {uri}")]
    Interrupted { method: Method, uri: String },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Service(Box<ServiceError>),
    #[error("failed to reset the request body for retry: {source}")]
    StreamReset {
        #[source]
        source: std::io::Error,
    },
    #[error(
        "unable to unmarshall response ({message}). Response Code: {status}, Response Text: {}",
        .reason.as_deref().unwrap_or("none")
    )]
    Unmarshall {
        status: u16,
        reason: Option<String>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("redirect limit exceeded ({max_redirects}) for {method} {uri}")]
    RedirectLimitExceeded {
        max_redirects: usize,
        method: Method,
        uri: String,
    },
    #[error("client has been shut down")]
    ClientShutdown,
    #[error("no transport configured and the `ureq-transport` feature is disabled")]
    TransportUnavailable,
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Credentials { .. } => ErrorCode::Credentials,
            Self::Signing { .. } => ErrorCode::Signing,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::Interrupted { .. } => ErrorCode::Interrupted,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Service(_) => ErrorCode::Service,
            Self::StreamReset { .. } => ErrorCode::StreamReset,
            Self::Unmarshall { .. } => ErrorCode::Unmarshall,
            Self::RedirectLimitExceeded { .. } => ErrorCode::RedirectLimitExceeded,
            Self::ClientShutdown => ErrorCode::ClientShutdown,
            Self::TransportUnavailable => ErrorCode::TransportUnavailable,
        }
    }

    /// Failures raised below the HTTP layer, always eligible for a retry decision.
    pub const fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::ReadBody { .. }
        )
    }

    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(error) => Some(error),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service(error) => Some(error.status),
            Self::Unmarshall { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_throttling(&self) -> bool {
        self.service_error().is_some_and(ServiceError::is_throttling)
    }

    pub fn is_clock_skew(&self) -> bool {
        self.service_error().is_some_and(ServiceError::is_clock_skew)
    }
}

impl From<ServiceError> for Error {
    fn from(error: ServiceError) -> Self {
        Self::Service(Box::new(error))
    }
}
