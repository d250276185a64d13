use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, Uri};

use crate::body::RequestBody;
use crate::error::Error;
use crate::progress::ProgressListener;
use crate::signer::CredentialsProvider;
use crate::util::{encode_parameters, join_base_path, parse_header_name, parse_header_value};

static NEXT_ROOT_KEY: AtomicU64 = AtomicU64::new(1);

/// Identity shared by a request and every clone made from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CloneRootKey(u64);

impl CloneRootKey {
    fn next() -> Self {
        Self(NEXT_ROOT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Caller-facing descriptor of a logical service call.
///
/// Cloning keeps the clone-root key, so response metadata recorded for any
/// clone is retrievable through the request it was cloned from.
#[derive(Clone)]
pub struct OriginalRequest {
    root_key: CloneRootKey,
    service_name: String,
    action: String,
    version: Option<String>,
    custom_headers: BTreeMap<String, String>,
    custom_parameters: BTreeMap<String, Vec<String>>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    progress_listener: Option<Arc<dyn ProgressListener>>,
    request_timeout: Option<Duration>,
    execution_timeout: Option<Duration>,
    user_agent_marker: Option<String>,
}

impl OriginalRequest {
    pub fn new(service_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            root_key: CloneRootKey::next(),
            service_name: service_name.into(),
            action: action.into(),
            version: None,
            custom_headers: BTreeMap::new(),
            custom_parameters: BTreeMap::new(),
            credentials: None,
            progress_listener: None,
            request_timeout: None,
            execution_timeout: None,
            user_agent_marker: None,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn custom_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn client_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn user_agent_marker(mut self, marker: impl Into<String>) -> Self {
        self.user_agent_marker = Some(marker.into());
        self
    }

    pub fn clone_root(&self) -> CloneRootKey {
        self.root_key
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn api_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn custom_headers(&self) -> &BTreeMap<String, String> {
        &self.custom_headers
    }

    pub fn custom_parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.custom_parameters
    }

    pub(crate) fn credentials_override(&self) -> Option<&Arc<dyn CredentialsProvider>> {
        self.credentials.as_ref()
    }

    pub(crate) fn listener(&self) -> Option<&Arc<dyn ProgressListener>> {
        self.progress_listener.as_ref()
    }

    pub fn request_timeout_override(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn execution_timeout_override(&self) -> Option<Duration> {
        self.execution_timeout
    }

    pub fn user_agent_marker_value(&self) -> Option<&str> {
        self.user_agent_marker.as_deref()
    }
}

impl std::fmt::Debug for OriginalRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OriginalRequest")
            .field("root_key", &self.root_key)
            .field("service_name", &self.service_name)
            .field("action", &self.action)
            .field("version", &self.version)
            .field("custom_headers", &self.custom_headers)
            .field("custom_parameters", &self.custom_parameters)
            .field("has_credentials_override", &self.credentials.is_some())
            .field("has_progress_listener", &self.progress_listener.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("execution_timeout", &self.execution_timeout)
            .finish()
    }
}

/// Protocol-neutral HTTP request owned by exactly one call.
pub struct WireRequest {
    original: OriginalRequest,
    endpoint: Uri,
    resource_path: String,
    method: Method,
    headers: HeaderMap,
    parameters: BTreeMap<String, Vec<String>>,
    body: RequestBody,
    time_offset: i32,
    context: Extensions,
    uri_override: Option<Uri>,
}

impl WireRequest {
    pub fn new(original: OriginalRequest, method: Method, endpoint: Uri) -> Self {
        Self {
            original,
            endpoint,
            resource_path: String::new(),
            method,
            headers: HeaderMap::new(),
            parameters: BTreeMap::new(),
            body: RequestBody::empty(),
            time_offset: 0,
            context: Extensions::new(),
            uri_override: None,
        }
    }

    /// Parses `endpoint` and builds the request in one step.
    pub fn parse(original: OriginalRequest, method: Method, endpoint: &str) -> Result<Self, Error> {
        let endpoint = endpoint.parse::<Uri>().map_err(|_| Error::InvalidUri {
            uri: endpoint.to_owned(),
        })?;
        Ok(Self::new(original, method, endpoint))
    }

    pub fn with_resource_path(mut self, resource_path: impl Into<String>) -> Self {
        self.resource_path = resource_path.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_parameter(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn original(&self) -> &OriginalRequest {
        &self.original
    }

    pub fn service_name(&self) -> &str {
        self.original.service_name()
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: Uri) {
        self.endpoint = endpoint;
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn set_resource_path(&mut self, resource_path: impl Into<String>) {
        self.resource_path = resource_path.into();
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Inserts a header, replacing any previous value under the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let header_name: HeaderName = parse_header_name(name)?;
        let header_value: HeaderValue = parse_header_value(name, value)?;
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    pub fn parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut BTreeMap<String, Vec<String>> {
        &mut self.parameters
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// Clock correction in seconds applied when signing.
    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    pub fn set_time_offset(&mut self, time_offset: i32) {
        self.time_offset = time_offset;
    }

    /// Typed per-call values shared between hooks. Never sent on the wire.
    pub fn context(&self) -> &Extensions {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Extensions {
        &mut self.context
    }

    pub(crate) fn set_uri_override(&mut self, uri: Option<Uri>) {
        self.uri_override = uri;
    }

    /// Address the transport should dial for the current attempt.
    pub fn full_uri(&self) -> Result<Uri, Error> {
        self.build_uri(true)
    }

    /// `full_uri` without the encoded parameters.
    pub fn full_uri_without_parameters(&self) -> Result<Uri, Error> {
        self.build_uri(false)
    }

    /// A `POST` without payload carries its parameters as a form body
    /// instead of the query string.
    pub fn sends_parameters_as_form(&self) -> bool {
        self.method == Method::POST
            && self.uri_override.is_none()
            && self.body.is_empty()
            && !self.parameters.is_empty()
    }

    pub fn encoded_parameters(&self) -> Option<String> {
        encode_parameters(&self.parameters)
    }

    fn build_uri(&self, with_parameters: bool) -> Result<Uri, Error> {
        if let Some(uri) = &self.uri_override {
            return Ok(uri.clone());
        }

        let base = self.endpoint.to_string();
        let mut uri_text = join_base_path(&base, &self.resource_path);
        if (self.resource_path.is_empty() || self.resource_path.ends_with('/'))
            && !uri_text.ends_with('/')
        {
            uri_text.push('/');
        }
        if with_parameters && let Some(query) = encode_parameters(&self.parameters) {
            uri_text.push(if uri_text.contains('?') { '&' } else { '?' });
            uri_text.push_str(&query);
        }
        uri_text
            .parse::<Uri>()
            .map_err(|_| Error::InvalidUri { uri: uri_text })
    }

    pub(crate) fn replace_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub(crate) fn replace_parameters(&mut self, parameters: BTreeMap<String, Vec<String>>) {
        self.parameters = parameters;
    }
}

impl std::fmt::Debug for WireRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WireRequest")
            .field("service_name", &self.original.service_name())
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("resource_path", &self.resource_path)
            .field("parameters", &self.parameters)
            .field("body", &self.body)
            .field("time_offset", &self.time_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::{OriginalRequest, WireRequest};

    #[test]
    fn clones_share_clone_root_key() {
        let request = OriginalRequest::new("kec", "DescribeInstances");
        let clone = request.clone();
        let other = OriginalRequest::new("kec", "DescribeInstances");
        assert_eq!(request.clone_root(), clone.clone_root());
        assert_ne!(request.clone_root(), other.clone_root());
    }

    #[test]
    fn full_uri_joins_path_and_encodes_parameters() {
        let request = WireRequest::parse(
            OriginalRequest::new("kec", "DescribeInstances"),
            Method::GET,
            "https://kec.api.example.com",
        )
        .expect("endpoint should parse")
        .with_resource_path("/")
        .with_parameter("Action", "DescribeInstances")
        .with_parameter("InstanceId.1", "i-1");

        assert_eq!(
            request.full_uri().expect("uri should build").to_string(),
            "https://kec.api.example.com/?Action=DescribeInstances&InstanceId.1=i-1"
        );
    }

    #[test]
    fn post_without_payload_moves_parameters_to_the_form_body() {
        let request = WireRequest::parse(
            OriginalRequest::new("kec", "RunInstances"),
            Method::POST,
            "https://kec.api.example.com",
        )
        .expect("endpoint should parse")
        .with_parameter("Action", "RunInstances");
        assert!(request.sends_parameters_as_form());
        assert_eq!(
            request
                .full_uri_without_parameters()
                .expect("uri should build")
                .to_string(),
            "https://kec.api.example.com/"
        );
        assert_eq!(
            request.encoded_parameters().as_deref(),
            Some("Action=RunInstances")
        );

        let with_payload = request.with_body("{}");
        assert!(!with_payload.sends_parameters_as_form());
    }

    #[test]
    fn headers_are_last_write_wins() {
        let mut request = WireRequest::parse(
            OriginalRequest::new("kec", "RunInstances"),
            Method::POST,
            "https://kec.api.example.com",
        )
        .expect("endpoint should parse");
        request.set_header("x-trace", "a").expect("valid header");
        request.set_header("x-trace", "b").expect("valid header");
        assert_eq!(request.headers().get_all("x-trace").iter().count(), 1);
        assert_eq!(request.headers()["x-trace"], "b");
    }
}
