use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{self, Read};
use std::sync::Mutex;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::request::CloneRootKey;
use crate::util::lock_unpoisoned;

pub const REQUEST_ID_HEADER: &str = "x-ksc-request-id";
pub const DEFAULT_RESPONSE_METADATA_CACHE_SIZE: usize = 50;

pub enum ResponseBody {
    Buffered(Bytes),
    Stream(Box<dyn Read + Send>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(body) => formatter
                .debug_tuple("Buffered")
                .field(&body.len())
                .finish(),
            Self::Stream(_) => formatter.write_str("Stream"),
        }
    }
}

/// Response as produced by a transport, before any handler runs.
#[derive(Debug)]
pub struct RawResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: ResponseBody,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            reason: status.canonical_reason().map(str::to_owned),
            headers,
            body,
        }
    }

    pub fn buffered(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, ResponseBody::Buffered(body.into()))
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase sent by the server, or the canonical one for the status.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header_str(REQUEST_ID_HEADER)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Reads a streaming body into memory. Buffered bodies are left as they are.
    pub fn buffer(&mut self) -> io::Result<&Bytes> {
        if let ResponseBody::Stream(reader) = &mut self.body {
            let mut collected = Vec::new();
            reader.read_to_end(&mut collected)?;
            self.body = ResponseBody::Buffered(Bytes::from(collected));
        }
        match &self.body {
            ResponseBody::Buffered(body) => Ok(body),
            ResponseBody::Stream(_) => Err(io::Error::other("response body is still streaming")),
        }
    }

    /// Buffers the body and returns a cheap copy of it.
    pub fn body_bytes(&mut self) -> io::Result<Bytes> {
        self.buffer().cloned()
    }

    /// Takes the body out of the response, leaving an empty buffer behind.
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Buffered(Bytes::new()))
    }
}

/// Service-level metadata attached to a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    request_id: Option<String>,
    fields: BTreeMap<String, String>,
}

impl ResponseMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// What a response handler produces: the typed result and optional metadata.
#[derive(Debug)]
pub struct ServiceResponse<T> {
    pub result: T,
    pub metadata: Option<ResponseMetadata>,
}

impl<T> ServiceResponse<T> {
    pub fn new(result: T) -> Self {
        Self {
            result,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Final result of a successful call.
#[derive(Debug)]
pub struct Response<T> {
    value: T,
    status: StatusCode,
    headers: HeaderMap,
    metadata: Option<ResponseMetadata>,
}

impl<T> Response<T> {
    pub(crate) fn new(
        value: T,
        status: StatusCode,
        headers: HeaderMap,
        metadata: Option<ResponseMetadata>,
    ) -> Self {
        Self {
            value,
            status,
            headers,
            metadata,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn metadata(&self) -> Option<&ResponseMetadata> {
        self.metadata.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(ResponseMetadata::request_id)
            .or_else(|| {
                self.headers
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
            })
    }
}

#[derive(Debug, Default)]
struct MetadataCacheState {
    entries: HashMap<CloneRootKey, ResponseMetadata>,
    order: VecDeque<CloneRootKey>,
}

/// Bounded map of the latest response metadata per clone root. The oldest
/// entry is evicted first.
#[derive(Debug)]
pub struct ResponseMetadataCache {
    capacity: usize,
    state: Mutex<MetadataCacheState>,
}

impl ResponseMetadataCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(MetadataCacheState::default()),
        }
    }

    pub fn add(&self, key: CloneRootKey, metadata: ResponseMetadata) {
        if self.capacity == 0 {
            return;
        }
        let mut state = lock_unpoisoned(&self.state);
        if state.entries.insert(key, metadata).is_some() {
            return;
        }
        state.order.push_back(key);
        while state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.entries.remove(&evicted);
            }
        }
    }

    pub fn get(&self, key: CloneRootKey) -> Option<ResponseMetadata> {
        lock_unpoisoned(&self.state).entries.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseMetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_METADATA_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use http::{HeaderMap, StatusCode};

    use super::{RawResponse, ResponseBody, ResponseMetadata, ResponseMetadataCache};
    use crate::request::OriginalRequest;

    #[test]
    fn metadata_cache_evicts_oldest_entry() {
        let cache = ResponseMetadataCache::new(2);
        let first = OriginalRequest::new("kec", "A");
        let second = OriginalRequest::new("kec", "B");
        let third = OriginalRequest::new("kec", "C");
        cache.add(first.clone_root(), ResponseMetadata::new().with_request_id("1"));
        cache.add(second.clone_root(), ResponseMetadata::new().with_request_id("2"));
        cache.add(third.clone_root(), ResponseMetadata::new().with_request_id("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(first.clone_root()).is_none());
        assert_eq!(
            cache
                .get(third.clone_root())
                .and_then(|metadata| metadata.request_id().map(str::to_owned))
                .as_deref(),
            Some("3")
        );
    }

    #[test]
    fn metadata_for_a_clone_is_found_through_the_root() {
        let cache = ResponseMetadataCache::default();
        let root = OriginalRequest::new("kec", "DescribeInstances");
        let clone = root.clone();
        cache.add(clone.clone_root(), ResponseMetadata::new().with_request_id("abc"));
        assert!(cache.get(root.clone_root()).is_some());
    }

    #[test]
    fn streaming_body_is_buffered_on_demand() {
        let mut response = RawResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            ResponseBody::Stream(Box::new(Cursor::new(b"{\"ok\":true}".to_vec()))),
        );
        assert!(response.is_streaming());
        assert_eq!(
            response.body_bytes().expect("body should buffer").as_ref(),
            b"{\"ok\":true}"
        );
        assert!(!response.is_streaming());
        assert_eq!(response.reason(), Some("OK"));
    }
}
