use std::marker::PhantomData;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::{BoxError, Error, ErrorType, ServiceError};
use crate::response::{RawResponse, ResponseMetadata, ServiceResponse};
use crate::util::truncate_body;

/// Failure raised by a response or error handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Already a client failure; reported to the caller unchanged.
    #[error(transparent)]
    Failure(#[from] Error),
    #[error("failed to read response: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode response json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(BoxError),
}

impl HandlerError {
    pub fn other(source: impl Into<BoxError>) -> Self {
        Self::Other(source.into())
    }
}

/// Turns a 2xx response into a typed result.
pub trait ResponseHandler<T>: Send + Sync {
    fn handle(&self, response: &mut RawResponse) -> Result<ServiceResponse<T>, HandlerError>;

    /// Streaming handlers keep the body reader; the engine then skips buffering.
    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

/// Turns a non-2xx response into a structured service failure.
pub trait ErrorResponseHandler: Send + Sync {
    fn handle(&self, response: &mut RawResponse) -> Result<ServiceError, HandlerError>;
}

pub struct JsonResponseHandler<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonResponseHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonResponseHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonResponseHandler<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("JsonResponseHandler")
    }
}

impl<T> ResponseHandler<T> for JsonResponseHandler<T>
where
    T: DeserializeOwned,
{
    fn handle(&self, response: &mut RawResponse) -> Result<ServiceResponse<T>, HandlerError> {
        let body = response.body_bytes()?;
        let document: serde_json::Value = serde_json::from_slice(&body)?;
        let request_id = document
            .get("RequestId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .or_else(|| response.request_id().map(str::to_owned));
        let result: T = serde_json::from_value(document)?;

        let mut metadata = ResponseMetadata::new();
        if let Some(request_id) = request_id {
            metadata = metadata.with_request_id(request_id);
        }
        Ok(ServiceResponse::new(result).with_metadata(metadata))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "RequestId")]
    request_id: Option<String>,
    #[serde(rename = "Error")]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "Type")]
    error_type: Option<String>,
}

/// Decodes `{"RequestId": .., "Error": {"Code", "Message", "Type"}}` bodies.
#[derive(Clone, Debug, Default)]
pub struct JsonErrorResponseHandler {
    service_name: String,
}

impl JsonErrorResponseHandler {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl ErrorResponseHandler for JsonErrorResponseHandler {
    fn handle(&self, response: &mut RawResponse) -> Result<ServiceError, HandlerError> {
        let body = response.body_bytes()?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(HandlerError::other("empty error response body"));
        }
        let envelope: ErrorEnvelope = serde_json::from_slice(&body)?;
        let Some(detail) = envelope.error else {
            return Err(HandlerError::other(format!(
                "error response has no Error element: {}",
                truncate_body(&body)
            )));
        };

        let status = response.status().as_u16();
        let error_type = match detail.error_type.as_deref() {
            Some("Sender" | "Client") => ErrorType::Client,
            Some("Receiver" | "Service") => ErrorType::Service,
            _ if status >= 500 => ErrorType::Service,
            _ => ErrorType::Client,
        };
        let mut error = ServiceError::new(
            status,
            detail.code.unwrap_or_else(|| status.to_string()),
            detail.message.unwrap_or_default(),
        )
        .with_service_name(self.service_name.clone())
        .with_error_type(error_type);
        if let Some(request_id) = envelope
            .request_id
            .or_else(|| response.request_id().map(str::to_owned))
        {
            error = error.with_request_id(request_id);
        }
        Ok(error)
    }
}
