use axum::extract::{FromRequest, Query, Request};
use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::{AdminError, code};

/// Admin parameters, read from the query string when there is one and from
/// the JSON body otherwise. An empty body reads as `{}`.
pub(crate) struct Params<T>(pub T);

impl<S, T> FromRequest<S> for Params<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AdminError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        if request.uri().query().is_some_and(|query| !query.is_empty()) {
            let Query(params) = Query::<T>::try_from_uri(request.uri())
                .map_err(|rejection| AdminError::bad_request(code::BAD_REQUEST, rejection.body_text()))?;

            return Ok(Self(params));
        }

        let body = Bytes::from_request(request, state)
            .await
            .map_err(|rejection| AdminError::bad_request(code::BAD_REQUEST, rejection.body_text()))?;

        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { &body };

        serde_json::from_slice(body)
            .map(Self)
            .map_err(|error| AdminError::bad_request(code::BAD_REQUEST, format!("invalid parameters: {error}")))
    }
}
