//! Request decoding and the response envelope.
//!
//! Success bodies are `{data, pagination?, details}`; failures go through
//! [`ApiError`] and share the `{error: {message, code}}` shape.

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Request},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use supper_types::{ListPage, Pagination, SessionContext};

use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The request ID assigned by the request-id layer, echoed back as
/// `details.traceID`.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for TraceId {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        Ok(TraceId(id))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Details {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "currentHouseholdID", skip_serializing_if = "Option::is_none")]
    pub current_household_id: Option<String>,
}

impl Details {
    pub fn new(trace: &TraceId, session: Option<&SessionContext>) -> Self {
        Self {
            trace_id: trace.0.clone(),
            current_household_id: session.map(|s| s.household_id().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct Body<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    details: Details,
}

pub fn with_status<T: Serialize>(status: StatusCode, details: Details, data: T) -> Response {
    (status, Json(Body { data, pagination: None, details })).into_response()
}

pub fn with_data<T: Serialize>(details: Details, data: T) -> Response {
    with_status(StatusCode::OK, details, data)
}

pub fn with_page<T: Serialize>(details: Details, page: ListPage<T>) -> Response {
    let body = Body { data: page.data, pagination: Some(page.pagination), details };
    (StatusCode::OK, Json(body)).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

pub fn not_found() -> ApiError {
    ApiError::NotFound
}

pub fn unauthorized() -> ApiError {
    ApiError::Unauthenticated
}

pub fn invalid_input(detail: impl Into<String>) -> ApiError {
    ApiError::InvalidInput { field: None, message: detail.into() }
}

pub fn internal_error(detail: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("{}", detail))
}

pub(crate) fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
}

/// A JSON request body. Unlike `axum::Json` it rejects with the uniform
/// error envelope.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_json(req.headers()) {
            return Err(ApiError::UnsupportedContentType);
        }
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
                _ => ApiError::bad_request("MALFORMED_INPUT", rejection.body_text()),
            })?;
        decode(&bytes).map(JsonBody)
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::bad_request("MALFORMED_INPUT", e.to_string()))
}

/// Decodes an optional body: empty means `T::default()`.
pub fn decode_or_default<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn json_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(is_json(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_json(&headers));
    }

    #[test]
    fn malformed_bodies_are_rejected_with_their_own_code() {
        let err = decode::<serde_json::Value>(b"{not json").unwrap_err();
        assert_eq!(err.code(), "MALFORMED_INPUT");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn empty_optional_body_is_the_default() {
        #[derive(Debug, Default, serde::Deserialize, PartialEq)]
        struct Flag {
            #[serde(default)]
            on: bool,
        }
        assert_eq!(decode_or_default::<Flag>(b"").unwrap(), Flag::default());
        assert_eq!(decode_or_default::<Flag>(br#"{"on":true}"#).unwrap(), Flag { on: true });
    }
}
