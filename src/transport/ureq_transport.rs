use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, Uri};
use tracing::debug;

use crate::error::{TransportError, TransportErrorKind};
use crate::request::WireRequest;
use crate::response::{RawResponse, ResponseBody};
use crate::util::{lock_unpoisoned, redact_uri_for_logs};

use super::Transport;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_POOL_MAX_IDLE_CONNECTIONS: usize = 50;
const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

#[derive(Clone, Debug)]
pub struct UreqTransportBuilder {
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_max_idle_connections: usize,
}

impl UreqTransportBuilder {
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host.max(1);
        self
    }

    pub fn pool_max_idle_connections(mut self, pool_max_idle_connections: usize) -> Self {
        self.pool_max_idle_connections = pool_max_idle_connections.max(1);
        self
    }

    pub fn build(self) -> UreqTransport {
        UreqTransport {
            agent: Mutex::new(Some(make_agent(&self))),
            connect_timeout: self.connect_timeout,
        }
    }
}

impl Default for UreqTransportBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            pool_max_idle_connections: DEFAULT_POOL_MAX_IDLE_CONNECTIONS,
        }
    }
}

/// Blocking transport backed by a pooled `ureq` agent.
pub struct UreqTransport {
    agent: Mutex<Option<ureq::Agent>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqTransport")
            .field("open", &lock_unpoisoned(&self.agent).is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> UreqTransportBuilder {
        UreqTransportBuilder::default()
    }

    fn agent(&self) -> Result<ureq::Agent, TransportError> {
        lock_unpoisoned(&self.agent).clone().ok_or_else(|| {
            TransportError::io(TransportErrorKind::Other, "transport has been shut down")
        })
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: &mut WireRequest,
        timeout: Option<Duration>,
    ) -> Result<RawResponse, TransportError> {
        let agent = self.agent()?;
        let form_body = request
            .sends_parameters_as_form()
            .then(|| request.encoded_parameters())
            .flatten();
        let uri = match form_body {
            Some(_) => request.full_uri_without_parameters(),
            None => request.full_uri(),
        }
        .map_err(|source| TransportError::io(TransportErrorKind::Other, source))?;
        let body = match form_body {
            Some(form) => Bytes::from(form),
            None => request.body_mut().read_remaining()?,
        };

        let mut builder = ureq::http::Request::builder()
            .method(request.method().clone())
            .uri(uri.clone());
        let headers = request.headers();
        if !headers.contains_key(HOST)
            && let Some(host) = host_header_value(&uri)
        {
            builder = builder.header(HOST, host);
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !headers.contains_key(CONTENT_TYPE) {
            builder = builder.header(CONTENT_TYPE, DEFAULT_CONTENT_TYPE);
        }
        let http_request = builder
            .body(body.to_vec())
            .map_err(|source| TransportError::io(TransportErrorKind::Other, source))?;

        let connect_timeout = match timeout {
            Some(timeout) => timeout.min(self.connect_timeout),
            None => self.connect_timeout,
        };
        let configured_request = agent
            .configure_request(http_request)
            .timeout_global(timeout)
            .timeout_connect(Some(connect_timeout))
            .build();

        debug!(uri = %redact_uri_for_logs(&uri.to_string()), "dispatching request");
        let response = agent.run(configured_request).map_err(|source| match source {
            ureq::Error::Timeout(_) => TransportError::Timeout,
            ureq::Error::Io(source) => TransportError::from(source),
            other => TransportError::io(classify_ureq_transport_error(&other), other),
        })?;

        let (parts, body) = response.into_parts();
        let mut headers = HeaderMap::with_capacity(parts.headers.len());
        for (name, value) in &parts.headers {
            headers.append(name.clone(), value.clone());
        }
        Ok(RawResponse::new(
            parts.status,
            headers,
            ResponseBody::Stream(Box::new(body.into_reader())),
        ))
    }

    fn shutdown(&self) {
        lock_unpoisoned(&self.agent).take();
    }
}

fn make_agent(settings: &UreqTransportBuilder) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .max_redirects_will_error(false)
        .max_idle_age(settings.pool_idle_timeout)
        .max_idle_connections_per_host(settings.pool_max_idle_per_host)
        .max_idle_connections(settings.pool_max_idle_connections)
        .build();
    config.new_agent()
}

/// Host without the port when the port is the scheme default.
fn host_header_value(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    let default_port = match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    };
    Some(match uri.port_u16() {
        Some(port) if port != default_port => format!("{host}:{port}"),
        _ => host.to_owned(),
    })
}

fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        _ => TransportErrorKind::Other,
    }
}
