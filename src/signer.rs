use std::sync::Arc;

use http::Uri;

use crate::error::{BoxError, ServiceError};
use crate::request::WireRequest;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self) -> Result<Credentials, BoxError>;
}

#[derive(Clone, Debug)]
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialsProvider for StaticCredentialsProvider {
    fn credentials(&self) -> Result<Credentials, BoxError> {
        Ok(self.credentials.clone())
    }
}

/// Request signing algorithm. Implementations read
/// [`WireRequest::time_offset`] to correct their timestamp.
pub trait Signer: Send + Sync {
    fn sign(&self, request: &mut WireRequest, credentials: &Credentials) -> Result<(), BoxError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpSigner;

impl Signer for NoOpSigner {
    fn sign(&self, _request: &mut WireRequest, _credentials: &Credentials) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Picks the signer for a target address, e.g. per region.
pub trait SignerProvider: Send + Sync {
    fn signer_for(&self, uri: &Uri) -> Option<Arc<dyn Signer>>;
}

#[derive(Clone)]
pub struct StaticSignerProvider {
    signer: Option<Arc<dyn Signer>>,
}

impl StaticSignerProvider {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    pub fn unsigned() -> Self {
        Self { signer: None }
    }
}

impl SignerProvider for StaticSignerProvider {
    fn signer_for(&self, _uri: &Uri) -> Option<Arc<dyn Signer>> {
        self.signer.clone()
    }
}

/// Endpoint and signer to use for a retry after an authentication failure.
#[derive(Clone, Default)]
pub struct AuthRetryParameters {
    signer: Option<Arc<dyn Signer>>,
    endpoint: Option<Uri>,
}

impl AuthRetryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn endpoint(mut self, endpoint: Uri) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn signer_for_retry(&self) -> Option<&Arc<dyn Signer>> {
        self.signer.as_ref()
    }

    pub fn endpoint_for_retry(&self) -> Option<&Uri> {
        self.endpoint.as_ref()
    }
}

impl std::fmt::Debug for AuthRetryParameters {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthRetryParameters")
            .field("has_signer", &self.signer.is_some())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Internal retry path for authentication failures, consulted before the
/// public retry policy.
pub trait AuthErrorRetryStrategy: Send + Sync {
    fn should_retry_with_auth_param(
        &self,
        request: &WireRequest,
        error: &ServiceError,
    ) -> Option<AuthRetryParameters>;
}

/// Which signer an attempt uses, and why.
#[derive(Clone, Default)]
pub(crate) enum SignerBinding {
    #[default]
    Unbound,
    BoundToUri {
        uri: Uri,
        signer: Option<Arc<dyn Signer>>,
    },
    BoundByAuthRetry {
        uri: Option<Uri>,
        signer: Option<Arc<dyn Signer>>,
    },
}

impl SignerBinding {
    /// Recomputes the binding for the next attempt. An auth-retry directive
    /// wins, then a redirect to a different address, otherwise an existing
    /// binding is kept.
    pub(crate) fn resolve(
        self,
        provider: &dyn SignerProvider,
        endpoint: &Uri,
        redirect: Option<&Uri>,
        auth_retry: Option<&AuthRetryParameters>,
    ) -> Self {
        if let Some(parameters) = auth_retry {
            return Self::BoundByAuthRetry {
                uri: parameters.endpoint_for_retry().cloned(),
                signer: parameters.signer_for_retry().cloned(),
            };
        }

        if let Some(redirect) = redirect
            && self.bound_uri() != Some(redirect)
        {
            return Self::BoundToUri {
                uri: redirect.clone(),
                signer: provider.signer_for(redirect),
            };
        }

        match self {
            Self::Unbound => Self::BoundToUri {
                uri: endpoint.clone(),
                signer: provider.signer_for(endpoint),
            },
            bound => bound,
        }
    }

    pub(crate) fn signer(&self) -> Option<&Arc<dyn Signer>> {
        match self {
            Self::Unbound => None,
            Self::BoundToUri { signer, .. } | Self::BoundByAuthRetry { signer, .. } => {
                signer.as_ref()
            }
        }
    }

    fn bound_uri(&self) -> Option<&Uri> {
        match self {
            Self::Unbound => None,
            Self::BoundToUri { uri, .. } => Some(uri),
            Self::BoundByAuthRetry { uri, .. } => uri.as_ref(),
        }
    }
}
