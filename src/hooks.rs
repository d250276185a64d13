use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::error::Error;
use crate::request::{OriginalRequest, WireRequest};
use crate::response::RawResponse;

/// Lifecycle callbacks around one call.
///
/// `before_marshal` and `before_send` run in registration order; the other
/// callbacks run in reverse, so the first hook to see the request is the last
/// to see the response.
pub trait Hook: Send + Sync {
    fn before_marshal(&self, request: OriginalRequest) -> OriginalRequest {
        request
    }

    fn before_send(&self, _request: &mut WireRequest) {}

    fn before_unmarshal(&self, _request: &WireRequest, response: RawResponse) -> RawResponse {
        response
    }

    fn after_response(&self, _request: &WireRequest, _status: StatusCode, _headers: &HeaderMap) {}

    fn after_error(&self, _request: &WireRequest, _error: &Error) {}
}

/// Hook list with both invocation orders computed once.
#[derive(Clone, Default)]
pub struct HookPipeline {
    forward: Vec<Arc<dyn Hook>>,
    reverse: Vec<Arc<dyn Hook>>,
}

impl HookPipeline {
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        let reverse = hooks.iter().rev().cloned().collect();
        Self {
            forward: hooks,
            reverse,
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// A new pipeline with `hooks` appended after the existing ones.
    pub(crate) fn extended(&self, hooks: &[Arc<dyn Hook>]) -> Self {
        if hooks.is_empty() {
            return self.clone();
        }
        let mut combined = self.forward.clone();
        combined.extend(hooks.iter().cloned());
        Self::new(combined)
    }

    /// Not called by the engine; the marshalling layer runs it before
    /// building the `WireRequest`.
    pub fn before_marshal(&self, request: OriginalRequest) -> OriginalRequest {
        self.forward
            .iter()
            .fold(request, |request, hook| hook.before_marshal(request))
    }

    pub fn before_send(&self, request: &mut WireRequest) {
        for hook in &self.forward {
            hook.before_send(request);
        }
    }

    pub fn before_unmarshal(&self, request: &WireRequest, response: RawResponse) -> RawResponse {
        self.reverse
            .iter()
            .fold(response, |response, hook| hook.before_unmarshal(request, response))
    }

    pub fn after_response(&self, request: &WireRequest, status: StatusCode, headers: &HeaderMap) {
        for hook in &self.reverse {
            hook.after_response(request, status, headers);
        }
    }

    pub fn after_error(&self, request: &WireRequest, error: &Error) {
        for hook in &self.reverse {
            hook.after_error(request, error);
        }
    }
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HookPipeline")
            .field("hooks", &self.forward.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use http::{HeaderMap, HeaderValue, Method, StatusCode};

    use super::{Hook, HookPipeline};
    use crate::request::{OriginalRequest, WireRequest};
    use crate::response::RawResponse;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Hook for Recorder {
        fn before_marshal(&self, request: OriginalRequest) -> OriginalRequest {
            self.log
                .lock()
                .expect("lock")
                .push(format!("marshal:{}", self.name));
            request.custom_header("x-hooked", self.name)
        }

        fn before_send(&self, _request: &mut WireRequest) {
            self.log
                .lock()
                .expect("lock")
                .push(format!("send:{}", self.name));
        }

        fn before_unmarshal(&self, _request: &WireRequest, mut response: RawResponse) -> RawResponse {
            response
                .headers_mut()
                .insert("x-last-hook", HeaderValue::from_static(self.name));
            response
        }

        fn after_response(&self, _request: &WireRequest, _status: StatusCode, _headers: &HeaderMap) {
            self.log
                .lock()
                .expect("lock")
                .push(format!("response:{}", self.name));
        }
    }

    fn pipeline(log: &Arc<Mutex<Vec<String>>>) -> HookPipeline {
        let hooks = ["A", "B", "C"]
            .into_iter()
            .map(|name| {
                Arc::new(Recorder {
                    name,
                    log: Arc::clone(log),
                }) as Arc<dyn Hook>
            })
            .collect();
        HookPipeline::new(hooks)
    }

    #[test]
    fn outbound_hooks_run_forward_and_inbound_hooks_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = pipeline(&log);
        let mut request = WireRequest::parse(
            OriginalRequest::new("kec", "DescribeInstances"),
            Method::GET,
            "https://kec.api.example.com",
        )
        .expect("endpoint should parse");

        hooks.before_send(&mut request);
        hooks.after_response(&request, StatusCode::OK, &HeaderMap::new());

        assert_eq!(
            *log.lock().expect("lock"),
            vec![
                "send:A",
                "send:B",
                "send:C",
                "response:C",
                "response:B",
                "response:A"
            ]
        );
    }

    #[test]
    fn replacement_values_are_threaded_through_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = pipeline(&log);
        let request = hooks.before_marshal(OriginalRequest::new("kec", "RunInstances"));
        assert_eq!(
            request.custom_headers().get("x-hooked").map(String::as_str),
            Some("C")
        );

        let wire = WireRequest::new(request, Method::GET, http::Uri::from_static("https://a.test"));
        let response = hooks.before_unmarshal(
            &wire,
            RawResponse::buffered(StatusCode::OK, HeaderMap::new(), ""),
        );
        assert_eq!(response.headers()["x-last-hook"], "A");
    }
}
