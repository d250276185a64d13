use std::time::{Duration, Instant, SystemTime};

use http::header::{CONTENT_LENGTH, LOCATION};
use http::{HeaderMap, StatusCode, Uri};
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::{Error, ErrorType, ServiceError, TimeoutPhase, TransportError};
use crate::handler::{ErrorResponseHandler, HandlerError, ResponseHandler};
use crate::progress::{ProgressEvent, publish};
use crate::request::WireRequest;
use crate::response::{RawResponse, Response, ResponseMetadata};
use crate::retry::RetryDecision;
use crate::signer::{AuthRetryParameters, SignerBinding};
use crate::util::{phase_timeout, resolve_redirect_uri};

use super::execute::{CallBudget, uri_for_logs};
use super::{RETRY_INFO_HEADER, ServiceClient};

const REQUEST_ENTITY_TOO_LARGE: &str = "Request entity too large";
const TEMPORARY_REDIRECT_CODE: &str = "TemporaryRedirect";

/// Mutable bookkeeping carried from one attempt of a call to the next.
#[derive(Default)]
pub(super) struct AttemptState {
    pub(super) attempts: usize,
    pub(super) redirects: usize,
    pub(super) auth_retries: usize,
    pub(super) last_backoff: Duration,
    /// Failure that scheduled the pending retry; cleared once the next
    /// attempt has paused for it.
    pub(super) retried_error: Option<Error>,
    pub(super) redirect: Option<Uri>,
    pub(super) auth_retry: Option<AuthRetryParameters>,
    pub(super) signer: SignerBinding,
}

impl AttemptState {
    pub(super) fn is_retry(&self) -> bool {
        self.attempts > 1 || self.redirect.is_some() || self.auth_retry.is_some()
    }

    fn clear_directives(&mut self) {
        self.retried_error = None;
        self.redirect = None;
        self.auth_retry = None;
    }
}

pub(super) enum AttemptOutcome<T> {
    Success(Response<T>),
    Redirect(Uri),
    AuthRetry(AuthRetryParameters),
    /// Eligible for the retry decision; the loop decides.
    Retryable(Error),
    Fatal(Error),
}

impl ServiceClient {
    /// One transport round-trip: credentials, backoff pause, signing,
    /// dispatch and classification of the response.
    pub(super) fn execute_one_request<T>(
        &self,
        request: &mut WireRequest,
        response_handler: &dyn ResponseHandler<T>,
        error_handler: &dyn ErrorResponseHandler,
        context: &mut ExecutionContext,
        state: &mut AttemptState,
        budget: &CallBudget,
    ) -> AttemptOutcome<T> {
        if let Some(error) = budget.interruption(request, context.cancellation()) {
            return AttemptOutcome::Fatal(error);
        }

        let provider = request
            .original()
            .credentials_override()
            .or_else(|| context.credentials())
            .cloned();
        let credentials = match provider {
            Some(provider) => {
                match context.metrics.time(
                    |metrics| &mut metrics.credentials_request_time,
                    || provider.credentials(),
                ) {
                    Ok(credentials) => Some(credentials),
                    Err(source) => return AttemptOutcome::Fatal(Error::Credentials { source }),
                }
            }
            None => None,
        };

        if state.is_retry() {
            publish(
                request.original().listener(),
                ProgressEvent::ClientRequestRetry,
            );
            if let Err(error) = self.pause_before_retry(request, context, state, budget) {
                return AttemptOutcome::Fatal(error);
            }
        }

        if let Err(error) = self.update_retry_header(request, state) {
            return AttemptOutcome::Fatal(error);
        }

        state.signer = std::mem::take(&mut state.signer).resolve(
            context.signers(),
            request.endpoint(),
            state.redirect.as_ref(),
            state.auth_retry.as_ref(),
        );
        if let (Some(signer), Some(credentials)) = (state.signer.signer().cloned(), &credentials) {
            let time_offset = self.clock_offset.get();
            if time_offset != 0 {
                request.set_time_offset(time_offset);
            }
            let signed = context.metrics.time(
                |metrics| &mut metrics.signing_time,
                || signer.sign(request, credentials),
            );
            if let Err(source) = signed {
                return AttemptOutcome::Fatal(Error::Signing {
                    method: request.method().clone(),
                    uri: uri_for_logs(request),
                    source,
                });
            }
        }
        state.clear_directives();

        let Some(timeout) = phase_timeout(
            budget.request_timeout,
            budget.execution_timeout,
            budget.started_at,
        ) else {
            return AttemptOutcome::Fatal(budget.deadline_exceeded(request));
        };

        publish(
            request.original().listener(),
            ProgressEvent::HttpRequestStarted,
        );
        debug!(attempt = state.attempts, "sending request");
        let sent = context.metrics.time(
            |metrics| &mut metrics.http_request_time,
            || self.transport.send(request, timeout),
        );
        let response = match sent {
            Ok(response) => response,
            Err(error) => return self.classify_transport_error(request, error, timeout, budget),
        };
        publish(
            request.original().listener(),
            ProgressEvent::HttpRequestCompleted,
        );

        let status = response.status();
        context.metrics.status_code = Some(status.as_u16());
        if let Some(request_id) = response.request_id() {
            debug!(status = status.as_u16(), request_id, "received response");
        }

        if status.is_success() {
            return self.handle_success(request, response, response_handler, context);
        }
        if status == StatusCode::TEMPORARY_REDIRECT
            && let Some(location) = response
                .header_str(LOCATION.as_str())
                .filter(|location| !location.is_empty())
        {
            if !request.body().is_repeatable() {
                return AttemptOutcome::Retryable(Error::from(unfollowable_redirect(
                    request, location,
                )));
            }
            return match request
                .full_uri()
                .ok()
                .and_then(|current| resolve_redirect_uri(&current, location))
            {
                Some(redirect) => AttemptOutcome::Redirect(redirect),
                None => AttemptOutcome::Fatal(Error::InvalidUri {
                    uri: location.to_owned(),
                }),
            };
        }
        let allow_auth_retry =
            request.body().is_repeatable() && state.auth_retries < self.config.max_auth_retries;
        self.handle_failure(request, response, error_handler, context, allow_auth_retry)
    }

    fn pause_before_retry(
        &self,
        request: &WireRequest,
        context: &mut ExecutionContext,
        state: &mut AttemptState,
        budget: &CallBudget,
    ) -> Result<(), Error> {
        let Some(previous) = state.retried_error.as_ref() else {
            return Ok(());
        };

        let attempts = state.attempts.saturating_sub(1);
        let decision = RetryDecision {
            request: request.original(),
            error: previous,
            attempts,
            retries_attempted: attempts.saturating_sub(1),
            body_repeatable: request.body().is_repeatable(),
        };
        let delay = self.config.retry_policy.delay_before_next_retry(&decision);
        warn!(
            attempt = state.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %previous,
            "retrying after retryable failure"
        );
        state.last_backoff = delay;

        let (wait, reaches_deadline) = match budget.remaining() {
            Some(remaining) if remaining <= delay => (remaining, true),
            _ => (delay, false),
        };
        let paused_at = Instant::now();
        let cancelled = context.cancellation().sleep(wait);
        context.metrics.retry_pause_time += paused_at.elapsed();

        if budget.deadline_passed() {
            return Err(budget.deadline_exceeded(request));
        }
        if cancelled {
            return Err(budget.interrupted(request));
        }
        if reaches_deadline {
            return Err(budget.deadline_exceeded(request));
        }
        Ok(())
    }

    /// `x-sdk-retry: {retries}/{last backoff ms}/{available capacity}`.
    fn update_retry_header(
        &self,
        request: &mut WireRequest,
        state: &AttemptState,
    ) -> Result<(), Error> {
        let available = self
            .retry_capacity
            .available_capacity()
            .map(|available| available.to_string())
            .unwrap_or_default();
        let value = format!(
            "{}/{}/{}",
            state.attempts.saturating_sub(1),
            state.last_backoff.as_millis(),
            available
        );
        request.set_header(RETRY_INFO_HEADER, &value)
    }

    fn classify_transport_error<T>(
        &self,
        request: &WireRequest,
        error: TransportError,
        timeout: Option<Duration>,
        budget: &CallBudget,
    ) -> AttemptOutcome<T> {
        if budget.deadline_passed() {
            return AttemptOutcome::Fatal(budget.deadline_exceeded(request));
        }
        let error = match error {
            TransportError::Timeout => Error::Timeout {
                phase: TimeoutPhase::Attempt,
                timeout_ms: timeout.map_or(0, |timeout| timeout.as_millis()),
                method: request.method().clone(),
                uri: uri_for_logs(request),
            },
            TransportError::Io { kind, source } => Error::Transport {
                kind,
                method: request.method().clone(),
                uri: uri_for_logs(request),
                source,
            },
        };
        AttemptOutcome::Retryable(error)
    }

    fn handle_success<T>(
        &self,
        request: &WireRequest,
        mut response: RawResponse,
        response_handler: &dyn ResponseHandler<T>,
        context: &mut ExecutionContext,
    ) -> AttemptOutcome<T> {
        let listener = request.original().listener();
        if !response_handler.needs_connection_left_open()
            && let Err(source) = response.buffer()
        {
            return AttemptOutcome::Retryable(Error::ReadBody { source });
        }

        publish(listener, ProgressEvent::HttpResponseStarted);
        if let Some(length) = response_content_length(response.headers()) {
            publish(listener, ProgressEvent::ResponseContentLength(length));
        }

        let status = response.status();
        let reason = response.reason().map(str::to_owned);
        let mut response = context.hook_pipeline().before_unmarshal(request, response);
        let handled = context.metrics.time(
            |metrics| &mut metrics.response_processing_time,
            || response_handler.handle(&mut response),
        );

        let service_response = match handled {
            Ok(service_response) => service_response,
            Err(HandlerError::Failure(error)) => return AttemptOutcome::Fatal(error),
            Err(HandlerError::Io(source)) => {
                return AttemptOutcome::Retryable(Error::ReadBody { source });
            }
            Err(other) => {
                return AttemptOutcome::Fatal(Error::Unmarshall {
                    status: status.as_u16(),
                    reason,
                    message: other.to_string(),
                    source: Some(other.into()),
                });
            }
        };

        let metadata = service_response.metadata.or_else(|| {
            response
                .request_id()
                .map(|request_id| ResponseMetadata::new().with_request_id(request_id))
        });
        if let Some(metadata) = &metadata {
            self.metadata_cache
                .add(request.original().clone_root(), metadata.clone());
        }

        if context.retry_capacity_consumed {
            self.retry_capacity
                .release_cost(self.config.retry_capacity_policy.configured_retry_cost());
        } else {
            self.retry_capacity.release();
        }
        publish(listener, ProgressEvent::HttpResponseCompleted);

        let headers = std::mem::take(response.headers_mut());
        AttemptOutcome::Success(Response::new(
            service_response.result,
            status,
            headers,
            metadata,
        ))
    }

    fn handle_failure<T>(
        &self,
        request: &mut WireRequest,
        mut response: RawResponse,
        error_handler: &dyn ErrorResponseHandler,
        context: &mut ExecutionContext,
        allow_auth_retry: bool,
    ) -> AttemptOutcome<T> {
        let service_error =
            match decode_service_error(request.service_name(), &mut response, error_handler) {
                Ok(service_error) => service_error,
                Err(error) if error.is_io() => return AttemptOutcome::Retryable(error),
                Err(error) => return AttemptOutcome::Fatal(error),
            };

        if service_error.is_throttling() {
            context.metrics.throttle_exception_count += 1;
            if let Some(metrics) = self.client_metrics() {
                metrics.record_throttle_error();
            }
        }

        if service_error.is_clock_skew() {
            let time_offset =
                self.clock_offset
                    .correct_from(response.headers(), &service_error, SystemTime::now());
            if time_offset != 0 {
                request.set_time_offset(time_offset);
                if let Some(metrics) = self.client_metrics() {
                    metrics.record_clock_skew_correction();
                }
            }
        }

        if let Some(parameters) = context
            .auth_retry_strategy()
            .filter(|_| allow_auth_retry)
            .and_then(|strategy| strategy.should_retry_with_auth_param(request, &service_error))
        {
            debug!(
                error_code = %service_error.error_code,
                "retrying with auth retry parameters"
            );
            return AttemptOutcome::AuthRetry(parameters);
        }

        AttemptOutcome::Retryable(Error::from(service_error))
    }
}

/// A 307 whose body cannot be replayed ends the call as a client failure.
fn unfollowable_redirect(request: &WireRequest, location: &str) -> ServiceError {
    ServiceError::new(
        StatusCode::TEMPORARY_REDIRECT.as_u16(),
        TEMPORARY_REDIRECT_CODE,
        format!("redirect to {location} needs a repeatable request body"),
    )
    .with_error_type(ErrorType::Client)
    .with_service_name(request.service_name())
}

/// Runs the error handler, falling back to a synthesized failure for 413 and
/// 5xx responses whose bodies cannot be decoded.
fn decode_service_error(
    service_name: &str,
    response: &mut RawResponse,
    error_handler: &dyn ErrorResponseHandler,
) -> Result<ServiceError, Error> {
    let status = response.status();
    let reason = response.reason().map(str::to_owned);
    let mut service_error = match error_handler.handle(response) {
        Ok(service_error) => service_error,
        Err(_) if status == StatusCode::PAYLOAD_TOO_LARGE => ServiceError::new(
            status.as_u16(),
            REQUEST_ENTITY_TOO_LARGE,
            REQUEST_ENTITY_TOO_LARGE,
        )
        .with_error_type(ErrorType::Client),
        Err(_) if status.is_server_error() => {
            let reason = reason.unwrap_or_else(|| status.as_u16().to_string());
            ServiceError::new(status.as_u16(), reason.clone(), reason)
                .with_error_type(ErrorType::Service)
        }
        Err(HandlerError::Failure(error)) => return Err(error),
        Err(HandlerError::Io(source)) => return Err(Error::ReadBody { source }),
        Err(other) => {
            return Err(Error::Unmarshall {
                status: status.as_u16(),
                reason,
                message: format!("unable to unmarshall error response: {other}"),
                source: Some(other.into()),
            });
        }
    };

    service_error.status = status.as_u16();
    service_error.service_name = service_name.to_owned();
    if service_error.request_id.is_none()
        && let Some(request_id) = response.request_id()
    {
        service_error.request_id = Some(request_id.to_owned());
    }
    Ok(service_error)
}

fn response_content_length(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_LENGTH)?;
    match value.to_str().ok().and_then(|text| text.trim().parse().ok()) {
        Some(length) => Some(length),
        None => {
            warn!(content_length = ?value, "unable to parse response content length");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue, StatusCode};

    use super::{decode_service_error, response_content_length};
    use crate::error::{Error, ErrorType};
    use crate::handler::JsonErrorResponseHandler;
    use crate::response::{REQUEST_ID_HEADER, RawResponse};

    fn raw(status: StatusCode, body: &'static str) -> RawResponse {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-7"));
        RawResponse::buffered(status, headers, body)
    }

    #[test]
    fn undecodable_413_becomes_client_error() {
        let handler = JsonErrorResponseHandler::new("kec");
        let error = decode_service_error(
            "kec",
            &mut raw(StatusCode::PAYLOAD_TOO_LARGE, ""),
            &handler,
        )
        .expect("413 should be synthesized");
        assert_eq!(error.status, 413);
        assert_eq!(error.error_type, ErrorType::Client);
        assert_eq!(error.message, "Request entity too large");
        assert_eq!(error.request_id.as_deref(), Some("req-7"));
    }

    #[test]
    fn undecodable_5xx_uses_reason_phrase() {
        let handler = JsonErrorResponseHandler::new("kec");
        let error = decode_service_error(
            "kec",
            &mut raw(StatusCode::SERVICE_UNAVAILABLE, "<html>busy</html>"),
            &handler,
        )
        .expect("5xx should be synthesized");
        assert_eq!(error.error_code, "Service Unavailable");
        assert_eq!(error.error_type, ErrorType::Service);
        assert!(error.is_retryable_server_error());
    }

    #[test]
    fn undecodable_4xx_is_unmarshall_failure() {
        let handler = JsonErrorResponseHandler::new("kec");
        let error = decode_service_error(
            "kec",
            &mut raw(StatusCode::BAD_REQUEST, "not json"),
            &handler,
        )
        .expect_err("4xx without a body should fail");
        assert!(matches!(error, Error::Unmarshall { status: 400, .. }), "{error}");
    }

    #[test]
    fn decoded_error_takes_status_and_service_name_from_the_call() {
        let handler = JsonErrorResponseHandler::new("other");
        let error = decode_service_error(
            "kec",
            &mut raw(
                StatusCode::FORBIDDEN,
                r#"{"Error":{"Code":"SignatureDoesNotMatch","Message":"bad"}}"#,
            ),
            &handler,
        )
        .expect("error should decode");
        assert_eq!(error.service_name, "kec");
        assert_eq!(error.status, 403);
        assert!(error.is_clock_skew());
    }

    #[test]
    fn content_length_ignores_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(response_content_length(&headers), None);
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(response_content_length(&headers), Some(42));
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("x"));
        assert_eq!(response_content_length(&headers), None);
    }
}
