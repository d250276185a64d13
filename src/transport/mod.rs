use std::time::Duration;

use crate::error::TransportError;
use crate::request::WireRequest;
use crate::response::RawResponse;

#[cfg(feature = "ureq-transport")]
mod ureq_transport;

#[cfg(feature = "ureq-transport")]
pub use ureq_transport::{UreqTransport, UreqTransportBuilder};

/// One HTTP round-trip. Implementations own connection pooling and TLS.
///
/// `timeout` bounds the whole round-trip; `None` means unbounded. A non-2xx
/// status is a normal response, not an error.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &mut WireRequest,
        timeout: Option<Duration>,
    ) -> Result<RawResponse, TransportError>;

    /// Releases pooled resources. Called once by the client on shutdown.
    fn shutdown(&self) {}
}
