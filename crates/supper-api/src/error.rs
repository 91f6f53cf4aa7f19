use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use supper_db::DbError;
use supper_types::ValidationError;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Absent, archived or outside the active household's scope. The three
    /// are indistinguishable to the caller.
    #[error("not found")]
    NotFound,

    #[error("invalid input: {message}")]
    InvalidInput { field: Option<String>, message: String },

    /// A 400 with its own machine code, e.g. `MALFORMED_INPUT`.
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("unsupported content type")]
    UnsupportedContentType,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::InvalidInput { field: Some(field.into()), message: message.into() }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest { code, message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidInput { .. } | ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> String {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED".into(),
            ApiError::Forbidden(_) => "FORBIDDEN".into(),
            ApiError::NotFound => "NOT_FOUND".into(),
            ApiError::InvalidInput { field: Some(field), .. } => format!("INVALID_INPUT.{}", field),
            ApiError::InvalidInput { field: None, .. } => "INVALID_INPUT".into(),
            ApiError::BadRequest { code, .. } => (*code).into(),
            ApiError::UnsupportedContentType => "UNSUPPORTED_CONTENT_TYPE".into(),
            ApiError::PayloadTooLarge => "PAYLOAD_TOO_LARGE".into(),
            ApiError::Conflict(_) => "CONFLICT".into(),
            ApiError::Transient(_) => "TRANSIENT".into(),
            ApiError::Internal(_) => "INTERNAL".into(),
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Unauthenticated => "unauthenticated".into(),
            ApiError::NotFound => "not found".into(),
            ApiError::InvalidInput { message, .. } => message.clone(),
            ApiError::BadRequest { message, .. } => message.clone(),
            ApiError::Forbidden(message) => message.clone(),
            ApiError::UnsupportedContentType => "request bodies must be application/json".into(),
            ApiError::PayloadTooLarge => "payload too large".into(),
            ApiError::Conflict(_) => "conflicts with an existing entity".into(),
            ApiError::Transient(_) => "temporarily unavailable, try again".into(),
            ApiError::Internal(_) => "internal error".into(),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => ApiError::NotFound,
            DbError::Conflict(detail) => ApiError::Conflict(detail),
            DbError::Invalid(detail) => ApiError::InvalidInput { field: None, message: detail },
            DbError::Finalized => ApiError::bad_request("MEAL_PLAN_FINALIZED", "the meal plan is already finalized"),
            DbError::Transient(detail) => ApiError::Transient(detail),
            DbError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::InvalidInput { field: Some(e.field), message: e.message }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(e) => error!("internal error: {:#}", e),
            ApiError::Transient(detail) => warn!("transient failure: {}", detail),
            ApiError::Conflict(detail) => debug!("conflict: {}", detail),
            other => debug!("request rejected: {}", other),
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }));

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_the_field_in_the_code() {
        let err: ApiError = ValidationError::new("events[0].options", "must not be empty").into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_INPUT.events[0].options");
    }

    #[test]
    fn db_errors_map_onto_http_kinds() {
        assert_eq!(ApiError::from(DbError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(DbError::Conflict("users.username".into())).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::from(DbError::Transient("busy".into())).status(), StatusCode::SERVICE_UNAVAILABLE);
        let finalized = ApiError::from(DbError::Finalized);
        assert_eq!(finalized.status(), StatusCode::BAD_REQUEST);
        assert_eq!(finalized.code(), "MEAL_PLAN_FINALIZED");
        let internal = ApiError::from(DbError::Other(anyhow::anyhow!("disk on fire")));
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.public_message(), "internal error");
    }
}
