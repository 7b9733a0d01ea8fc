use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use flavor::FlavorError;
use http::{HeaderMap, StatusCode};
use registry::{ServiceSource, StoreError};
use thiserror::Error;

/// Errors of the request lifecycle, from ingress parsing to the upstream exchange.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The inbound request cannot be turned into a service request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    #[error("service '{0}' has neither a local nor a remote provider")]
    NoProvider(String),

    #[error("provider '{provider}' not found for {location} of service '{service}'")]
    ProviderNotFound {
        provider: String,
        location: ServiceSource,
        service: String,
    },

    #[error("no downloaded model found for {location} of service '{service}'")]
    NoModel { location: ServiceSource, service: String },

    #[error("model '{model}' not found for {location} of service '{service}'")]
    ModelNotFound {
        model: String,
        location: ServiceSource,
        service: String,
    },

    #[error("model '{model}' is still installing for {location} of service '{service}', please wait")]
    ModelNotReady {
        model: String,
        location: ServiceSource,
        service: String,
    },

    /// The provider record cannot be turned into an upstream request.
    #[error("provider '{provider}' is misconfigured: {message}")]
    ProviderConfig { provider: String, message: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Flavor(#[from] FlavorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Connecting to or reading from the provider failed.
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status; written back verbatim.
    #[error("service provider returned {status}")]
    UpstreamStatus {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    #[error("malformed multi-segment response: {0}")]
    MultiSegment(String),

    #[error("multi-segment task '{task_id}' did not finish after {attempts} polls")]
    PollLimit { task_id: String, attempts: u32 },

    #[error("scheduler is not running")]
    SchedulerClosed,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamStatus { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::UpstreamStatus { status, headers, body } => {
                let mut response = (status, body).into_response();
                *response.headers_mut() = header_rules::forwardable(&headers);

                response
            }
            error => {
                let status = error.status_code();

                if status.is_server_error() {
                    log::error!("task failed: {error}");
                }

                (status, error.to_string()).into_response()
            }
        }
    }
}
