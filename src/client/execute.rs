use std::time::{Duration, Instant};

use http::header::USER_AGENT;
use tracing::{Span, debug, field, info_span};
use uuid::Uuid;

use crate::context::{CancelHandle, ExecutionContext};
use crate::error::Error;
use crate::handler::{ErrorResponseHandler, ResponseHandler};
use crate::metrics::{ClientMetrics, RequestMetrics};
use crate::progress::{ProgressEvent, publish};
use crate::request::{OriginalRequest, WireRequest};
use crate::response::Response;
use crate::retry::RetryDecision;
use crate::signer::AuthRetryParameters;
use crate::util::{endpoint_of, redact_uri_for_logs};

use super::attempt::{AttemptOutcome, AttemptState};
use super::{INVOCATION_ID_HEADER, ServiceClient};

/// Time limits of one call, resolved once from the request and the client.
pub(super) struct CallBudget {
    pub(super) request_timeout: Option<Duration>,
    pub(super) execution_timeout: Option<Duration>,
    pub(super) started_at: Instant,
}

impl CallBudget {
    fn new(original: &OriginalRequest, client: &ServiceClient, started_at: Instant) -> Self {
        Self {
            request_timeout: original
                .request_timeout_override()
                .or(client.config.request_timeout),
            execution_timeout: original
                .execution_timeout_override()
                .or(client.config.client_execution_timeout),
            started_at,
        }
    }

    /// Time left before the call deadline; `None` when the call is unbounded.
    pub(super) fn remaining(&self) -> Option<Duration> {
        self.execution_timeout
            .map(|timeout| timeout.saturating_sub(self.started_at.elapsed()))
    }

    pub(super) fn deadline_passed(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining.is_zero())
    }

    /// The deadline wins over an external cancel observed at the same boundary.
    pub(super) fn interruption(&self, request: &WireRequest, cancel: &CancelHandle) -> Option<Error> {
        if self.deadline_passed() {
            return Some(self.deadline_exceeded(request));
        }
        if cancel.is_cancelled() {
            return Some(self.interrupted(request));
        }
        None
    }

    pub(super) fn deadline_exceeded(&self, request: &WireRequest) -> Error {
        Error::DeadlineExceeded {
            timeout_ms: self.execution_timeout.unwrap_or_default().as_millis(),
            method: request.method().clone(),
            uri: uri_for_logs(request),
        }
    }

    pub(super) fn interrupted(&self, request: &WireRequest) -> Error {
        Error::Interrupted {
            method: request.method().clone(),
            uri: uri_for_logs(request),
        }
    }
}

pub(super) fn uri_for_logs(request: &WireRequest) -> String {
    match request.full_uri() {
        Ok(uri) => redact_uri_for_logs(&uri.to_string()),
        Err(_) => redact_uri_for_logs(&request.endpoint().to_string()),
    }
}

impl ServiceClient {
    /// Runs one logical call to completion: decorates the request, drives
    /// attempts through signing, dispatch, redirects and retries, and
    /// returns the handled response or the last failure.
    pub fn execute<T>(
        &self,
        mut request: WireRequest,
        response_handler: &dyn ResponseHandler<T>,
        error_handler: &dyn ErrorResponseHandler,
        context: &mut ExecutionContext,
    ) -> crate::Result<Response<T>> {
        if self.is_shut_down() {
            return Err(Error::ClientShutdown);
        }

        let started_at = Instant::now();
        let original = request.original().clone();
        let listener = original.listener().cloned();
        let budget = CallBudget::new(&original, self, started_at);
        context.metrics = RequestMetrics::new(original.service_name(), original.action());
        context.retry_capacity_consumed = false;

        let client_metrics = self.client_metrics();
        if let Some(metrics) = client_metrics {
            metrics.record_call_started();
        }
        let _in_flight = client_metrics.map(ClientMetrics::enter_in_flight);

        let span = info_span!(
            "sdkcall.request",
            service = original.service_name(),
            action = original.action(),
            method = %request.method(),
            uri = %uri_for_logs(&request),
            attempt = field::Empty,
        );
        let _entered = span.enter();

        publish(listener.as_ref(), ProgressEvent::ClientRequestStarted);
        if let Some(length) = request.body().content_length() {
            publish(listener.as_ref(), ProgressEvent::RequestContentLength(length));
        }

        let hooks = context.hook_pipeline().clone();
        let result = self.decorate(&mut request).and_then(|()| {
            hooks.before_send(&mut request);
            self.execute_helper(
                &mut request,
                response_handler,
                error_handler,
                context,
                &budget,
                &span,
            )
        });

        match &result {
            Ok(response) => {
                hooks.after_response(&request, response.status(), response.headers());
                publish(listener.as_ref(), ProgressEvent::ClientRequestSucceeded);
            }
            Err(error) => {
                hooks.after_error(&request, error);
                publish(listener.as_ref(), ProgressEvent::ClientRequestFailed);
            }
        }

        let elapsed = started_at.elapsed();
        context.metrics.client_execute_time = elapsed;
        if let Some(metrics) = client_metrics {
            metrics.record_call_completed(&result, context.metrics.status_code, elapsed);
        }
        if let Some(collector) = &self.metric_collector {
            collector.collect(&context.metrics);
        }
        result
    }

    pub(super) fn client_metrics(&self) -> Option<&ClientMetrics> {
        self.config.metrics_enabled.then_some(&self.metrics)
    }

    /// Merges the caller's custom headers and parameters, then stamps the
    /// invocation id and user agent.
    fn decorate(&self, request: &mut WireRequest) -> crate::Result<()> {
        let original = request.original().clone();
        for (name, value) in original.custom_headers() {
            request.set_header(name, value)?;
        }
        for (name, values) in original.custom_parameters() {
            for value in values {
                request.add_parameter(name.clone(), value.clone());
            }
        }

        request.set_header(INVOCATION_ID_HEADER, &Uuid::new_v4().to_string())?;
        let user_agent = match original.user_agent_marker_value() {
            Some(marker) => format!("{} {marker}", self.config.user_agent),
            None => self.config.user_agent.clone(),
        };
        request.set_header(USER_AGENT.as_str(), &user_agent)
    }

    /// Every failure leaves through here: consumed retry capacity goes back
    /// to the pool and a repeatable body is rewound for the caller.
    fn execute_helper<T>(
        &self,
        request: &mut WireRequest,
        response_handler: &dyn ResponseHandler<T>,
        error_handler: &dyn ErrorResponseHandler,
        context: &mut ExecutionContext,
        budget: &CallBudget,
        span: &Span,
    ) -> crate::Result<Response<T>> {
        let result = self.run_attempts(
            request,
            response_handler,
            error_handler,
            context,
            budget,
            span,
        );
        result.map_err(|error| {
            self.abandon(context);
            last_reset(request, error)
        })
    }

    fn run_attempts<T>(
        &self,
        request: &mut WireRequest,
        response_handler: &dyn ResponseHandler<T>,
        error_handler: &dyn ErrorResponseHandler,
        context: &mut ExecutionContext,
        budget: &CallBudget,
        span: &Span,
    ) -> crate::Result<Response<T>> {
        let original_headers = request.headers().clone();
        let original_parameters = request.parameters().clone();
        let body_repeatable = request.body().is_repeatable();
        if !request.body().remarks_every_attempt() {
            request
                .body_mut()
                .mark()
                .map_err(|source| Error::StreamReset { source })?;
        }

        let mut state = AttemptState::default();
        loop {
            if let Some(error) = budget.interruption(request, context.cancellation()) {
                return Err(error);
            }

            state.attempts += 1;
            span.record("attempt", state.attempts);
            context.metrics.request_count += 1;
            if let Some(metrics) = self.client_metrics() {
                metrics.record_attempt();
            }

            if state.is_retry() {
                request.replace_headers(original_headers.clone());
                request.replace_parameters(original_parameters.clone());
                request.set_uri_override(None);
                request
                    .body_mut()
                    .reset()
                    .map_err(|source| Error::StreamReset { source })?;
                if let Some(redirect) = &state.redirect {
                    let endpoint = endpoint_of(redirect).ok_or_else(|| Error::InvalidUri {
                        uri: redirect.to_string(),
                    })?;
                    request.set_endpoint(endpoint);
                    request.set_resource_path(redirect.path());
                    request.set_uri_override(Some(redirect.clone()));
                } else if let Some(endpoint) = state
                    .auth_retry
                    .as_ref()
                    .and_then(AuthRetryParameters::endpoint_for_retry)
                {
                    request.set_endpoint(endpoint.clone());
                }
            }
            if request.body().remarks_every_attempt() {
                request
                    .body_mut()
                    .mark()
                    .map_err(|source| Error::StreamReset { source })?;
            }

            match self.execute_one_request(
                request,
                response_handler,
                error_handler,
                context,
                &mut state,
                budget,
            ) {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Redirect(redirect) => {
                    if state.redirects >= self.config.max_redirects {
                        let error = Error::RedirectLimitExceeded {
                            max_redirects: self.config.max_redirects,
                            method: request.method().clone(),
                            uri: uri_for_logs(request),
                        };
                        return Err(error);
                    }
                    state.redirects += 1;
                    if let Some(metrics) = self.client_metrics() {
                        metrics.record_redirect();
                    }
                    debug!(
                        location = %redact_uri_for_logs(&redirect.to_string()),
                        "redirecting request"
                    );
                    state.redirect = Some(redirect);
                }
                AttemptOutcome::AuthRetry(parameters) => {
                    state.auth_retries += 1;
                    state.auth_retry = Some(parameters);
                }
                AttemptOutcome::Retryable(error) => {
                    context.metrics.exception_count += 1;
                    if !self.should_retry(request, &error, context, &state, body_repeatable) {
                        return Err(error);
                    }
                    if let Some(metrics) = self.client_metrics() {
                        metrics.record_retry();
                    }
                    state.retried_error = Some(error);
                }
                AttemptOutcome::Fatal(error) => {
                    context.metrics.exception_count += 1;
                    return Err(error);
                }
            }
        }
    }

    /// Admission and policy check after a retryable failure. Capacity is
    /// only taken for failures that are not throttling.
    fn should_retry(
        &self,
        request: &WireRequest,
        error: &Error,
        context: &mut ExecutionContext,
        state: &AttemptState,
        body_repeatable: bool,
    ) -> bool {
        let retries = state.attempts.saturating_sub(1);
        if retries >= self.config.effective_max_error_retry() {
            return false;
        }
        if !body_repeatable {
            debug!("request body is not repeatable");
            return false;
        }

        let retry_cost = self.config.retry_capacity_policy.configured_retry_cost();
        if !error.is_throttling() {
            if !self.retry_capacity.acquire(retry_cost) {
                debug!(retry_cost, "retry capacity exhausted");
                if let Some(metrics) = self.client_metrics() {
                    metrics.record_capacity_acquire_failure();
                }
                return false;
            }
            context.retry_capacity_consumed = true;
            context.metrics.retry_capacity_consumed += retry_cost as u64;
        }

        let decision = RetryDecision {
            request: request.original(),
            error,
            attempts: state.attempts,
            retries_attempted: retries,
            body_repeatable,
        };
        self.config.retry_policy.should_retry(&decision)
    }

    /// Gives back one retry cost if this call consumed capacity.
    fn abandon(&self, context: &ExecutionContext) {
        if context.retry_capacity_consumed {
            self.retry_capacity
                .release_cost(self.config.retry_capacity_policy.configured_retry_cost());
        }
    }
}

/// Rewinds a repeatable body once more so the caller can reuse it.
fn last_reset(request: &mut WireRequest, error: Error) -> Error {
    if request.body().is_repeatable()
        && let Err(reset_error) = request.body_mut().reset()
    {
        debug!(error = %reset_error, "failed to reset request body after the final attempt");
    }
    error
}
