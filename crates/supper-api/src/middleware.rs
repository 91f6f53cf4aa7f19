use std::any::Any;

use axum::{
    Router,
    body::{Body, HttpBody as _},
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn};

use crate::envelope::{REQUEST_ID_HEADER, is_json};
use crate::error::ApiError;
use crate::session::attach_session;
use crate::{ApiConfig, AppState};

/// Layers that only apply under the API prefix: session resolution runs
/// innermost, after the content type has been checked.
pub fn api_layers(api: Router<AppState>, state: &AppState) -> Router<AppState> {
    api.layer(middleware::from_fn_with_state(state.clone(), attach_session))
        .layer(middleware::from_fn(require_json))
}

/// Panic recovery outermost, then request IDs and tracing, then the
/// timeout, body limit and CORS.
pub fn outer_layers(app: Router<AppState>, config: &ApiConfig) -> Router<AppState> {
    app.layer(cors(&config.cors_origins))
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let request_id = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            info_span!("request", method = %req.method(), uri = %req.uri(), request_id)
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::custom(panic_response))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::Internal(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}

/// Any origin when none are configured; otherwise exactly the configured
/// origins, with credentials so the session cookie travels.
pub fn cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring unparsable CORS origin {:?}", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Bodies of mutating requests must be JSON. The avatar upload is the one
/// route that takes raw image bytes.
pub async fn require_json(req: Request, next: Next) -> Result<Response, ApiError> {
    let mutating = matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH);
    if mutating && has_body(&req) && !is_json(req.headers()) && !is_image(&req) {
        return Err(ApiError::UnsupportedContentType);
    }
    Ok(next.run(req).await)
}

fn has_body(req: &Request) -> bool {
    match req.headers().get(header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()) {
        Some(len) => len.trim() != "0",
        None => req.body().size_hint().lower() > 0 || !req.body().is_end_stream(),
    }
}

fn is_image(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
}

pub async fn fallback() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http;

    #[test]
    fn bodies_are_detected_by_length_or_stream() {
        let empty = http::Request::builder().method("POST").body(Body::empty()).unwrap();
        assert!(!has_body(&empty));

        let sized = http::Request::builder()
            .method("POST")
            .header(header::CONTENT_LENGTH, "2")
            .body(Body::from("{}"))
            .unwrap();
        assert!(has_body(&sized));

        let r#unsized = http::Request::builder().method("POST").body(Body::from("hello")).unwrap();
        assert!(has_body(&r#unsized));
    }

    #[test]
    fn image_uploads_are_recognized() {
        let req = http::Request::builder()
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::empty())
            .unwrap();
        assert!(is_image(&req));
    }
}
