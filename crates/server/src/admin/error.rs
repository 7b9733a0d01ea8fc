use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use registry::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Business codes of the admin API. The leading digit names the family:
/// 1 for services, 2 for providers, 3 for models.
pub(crate) mod code {
    pub const SERVICE_SUCCESS: u32 = 10000;
    pub const SERVICE_BAD_REQUEST: u32 = 10001;
    pub const PROVIDER_INSERT_FAILED: u32 = 10007;
    pub const PROVIDER_EXISTS: u32 = 10009;
    pub const SERVICE_NOT_FOUND: u32 = 10011;
    pub const SERVICE_EDIT_FAILED: u32 = 10012;
    pub const VERSION_MISMATCH: u32 = 10014;
    pub const UNSUPPORTED_SERVICE: u32 = 10015;
    pub const UNSUPPORTED_HYBRID_POLICY: u32 = 10016;
    pub const UNSUPPORTED_FLAVOR: u32 = 10017;
    pub const UNSUPPORTED_AUTH_TYPE: u32 = 10018;

    pub const PROVIDER_SUCCESS: u32 = 20000;
    pub const PROVIDER_BAD_REQUEST: u32 = 20001;
    pub const PROVIDER_INVALID: u32 = 20002;
    pub const PROVIDER_UNAVAILABLE: u32 = 20003;
    pub const PROVIDER_MODEL_EMPTY: u32 = 20004;
    pub const PROVIDER_UPDATE_FAILED: u32 = 20005;
    pub const AUTH_INFO_LOST: u32 = 20006;
    pub const URL_IRREGULAR: u32 = 20007;

    pub const MODEL_SUCCESS: u32 = 30000;
    pub const MODEL_BAD_REQUEST: u32 = 30001;
    pub const MODEL_EXISTS: u32 = 30002;
    pub const MODEL_NOT_EXIST: u32 = 30003;
    pub const ADD_MODEL_FAILED: u32 = 30004;
    pub const DELETE_MODEL_FAILED: u32 = 30005;
    pub const ENGINE_DELETE_FAILED: u32 = 30006;

    /// Malformed parameters, before any family-specific check ran.
    pub const BAD_REQUEST: u32 = 400;
    pub const RECORD_NOT_FOUND: u32 = 404;
    pub const INTERNAL: u32 = 500;
}

/// Admin API failures, each carrying its business code.
#[derive(Debug, Error)]
pub(crate) enum AdminError {
    #[error("{message}")]
    BadRequest { code: u32, message: String },

    #[error("{message}")]
    NotFound { code: u32, message: String },

    /// A provider failed its health check or answered with an error.
    #[error("{message}")]
    ProviderUnavailable { code: u32, message: String },

    /// The local engine refused to install, pull or delete a model.
    #[error("{message}")]
    Engine { code: u32, message: String },

    /// Details are logged, never returned.
    #[error("The service has lapsed.")]
    Internal(String),
}

impl AdminError {
    pub fn bad_request(code: u32, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: u32, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            code: code::PROVIDER_UNAVAILABLE,
            message: message.into(),
        }
    }

    pub fn engine(code: u32, message: impl Into<String>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
        }
    }

    pub fn business_code(&self) -> u32 {
        match self {
            Self::BadRequest { code, .. }
            | Self::NotFound { code, .. }
            | Self::ProviderUnavailable { code, .. }
            | Self::Engine { code, .. } => *code,
            Self::Internal(_) => code::INTERNAL,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } | Self::ProviderUnavailable { .. } | Self::Engine { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a failed registry write to `code`, keeping not-found and internal
    /// errors as they are.
    pub fn write_failed(code: u32) -> impl FnOnce(StoreError) -> Self {
        move |error| match error {
            StoreError::NotFound { .. } => error.into(),
            error => {
                log::warn!("registry write failed: {error}");
                Self::bad_request(code, error.to_string())
            }
        }
    }
}

impl From<StoreError> for AdminError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { .. } => Self::not_found(code::RECORD_NOT_FOUND, error.to_string()),
            error => Self::Internal(error.to_string()),
        }
    }
}

/// The `{business_code, message, data}` body of every admin response.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<T> {
    pub business_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn with_data(business_code: u32, data: T) -> Self {
        Self {
            business_code,
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    pub fn success(business_code: u32) -> Self {
        Self {
            business_code,
            message: "success".to_string(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::Internal(details) => log::error!("admin request failed: {details}"),
            error => log::debug!("admin request rejected ({}): {error}", error.business_code()),
        }

        let body = Envelope::<()> {
            business_code: self.business_code(),
            message: self.to_string(),
            data: None,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use super::*;

    async fn render(error: AdminError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn business_errors_carry_their_code() {
        let (status, body) = render(AdminError::bad_request(code::UNSUPPORTED_FLAVOR, "unsupported flavor 'acme'")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        insta::assert_json_snapshot!(body, @r#"
        {
          "business_code": 10017,
          "message": "unsupported flavor 'acme'"
        }
        "#);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) = render(AdminError::Internal("disk on fire".to_string())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        insta::assert_json_snapshot!(body, @r#"
        {
          "business_code": 500,
          "message": "The service has lapsed."
        }
        "#);
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let error = AdminError::from(StoreError::NotFound {
            kind: "provider",
            name: "gone".to_string(),
        });

        let (status, body) = render(error).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["business_code"], 404);
    }
}
