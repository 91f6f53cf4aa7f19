//! Session resolution. A request is authenticated by a bearer JWT or, failing
//! that, by the opaque session cookie; either way the session context is
//! rebuilt from the database so bans and membership changes apply at once.

use std::ops::Deref;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use supper_db::SessionDataManager;
use supper_types::{SessionContext, time};
use tracing::{Instrument, debug, info_span};

use crate::AppState;
use crate::error::ApiError;
use crate::service::run_db;

/// Secret shipped in sample configs; refused outside debug mode.
pub const PLACEHOLDER_JWT_SECRET: &str = "change-me";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_lifetime: Duration,
    pub cookie_name: String,
    pub session_lifetime: Duration,
    pub secure_cookies: bool,
    pub enable_signup: bool,
    pub minimum_username_length: usize,
    pub minimum_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: PLACEHOLDER_JWT_SECRET.into(),
            token_lifetime: Duration::from_secs(24 * 60 * 60),
            cookie_name: "supper_session".into(),
            session_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            secure_cookies: false,
            enable_signup: true,
            minimum_username_length: 3,
            minimum_password_length: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "householdID")]
    pub household_id: String,
    pub exp: usize,
}

pub fn create_token(config: &AuthConfig, user_id: &str, household_id: &str) -> Result<String, ApiError> {
    let exp = time::now() + chrono::Duration::from_std(config.token_lifetime).unwrap_or(chrono::Duration::hours(24));
    let claims = Claims {
        sub: user_id.to_string(),
        household_id: household_id.to_string(),
        exp: exp.timestamp().max(0) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(config.jwt_secret.as_bytes()))
        .map_err(|e| ApiError::Internal(e.into()))
}

pub fn decode_token(config: &AuthConfig, token: &str) -> Option<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(config.jwt_secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| debug!("rejected bearer token: {}", e))
        .ok()
}

/// A fresh cookie token: 32 random bytes, URL-safe base64.
pub fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only this digest of a cookie token is ever stored.
pub fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The cookie carries no expiry of its own; the server-side row decides how
/// long the session lives.
pub fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .build()
}

pub fn expired_cookie(config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), "")).path("/").build()
}

/// The authenticated caller. Handlers take this as an extractor; it rejects
/// with 401 when no session could be resolved.
#[derive(Debug, Clone)]
pub struct Session {
    pub context: SessionContext,
    /// Digest of the cookie token when the session came from a cookie.
    pub cookie_hash: Option<String>,
}

impl Deref for Session {
    type Target = SessionContext;

    fn deref(&self) -> &SessionContext {
        &self.context
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().cloned().ok_or(ApiError::Unauthenticated)
    }
}

/// Resolves the caller and stores the [`Session`] in the request
/// extensions. Requests without valid credentials pass through
/// unauthenticated; handlers that need a session reject them.
pub async fn attach_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = match resolve(&state, req.headers()).await {
        Ok(session) => session,
        Err(e) => return axum::response::IntoResponse::into_response(e),
    };

    let span = match &session {
        Some(s) => info_span!("session", user_id = %s.user_id(), household_id = %s.household_id()),
        None => info_span!("session", user_id = tracing::field::Empty, household_id = tracing::field::Empty),
    };
    if let Some(session) = session {
        req.extensions_mut().insert(session);
    }
    next.run(req).instrument(span).await
}

async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<Option<Session>, ApiError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if let Some(claims) = bearer.and_then(|token| decode_token(&state.config.auth, token)) {
        let context = run_db(&state.db, move |db| {
            Ok(db.session_context(&claims.sub, Some(&claims.household_id))?)
        })
        .await?;
        return Ok(context.map(|context| Session { context, cookie_hash: None }));
    }

    let jar = CookieJar::from_headers(headers);
    let Some(cookie) = jar.get(&state.config.auth.cookie_name) else {
        return Ok(None);
    };
    let hash = digest(cookie.value());
    let lookup = hash.clone();
    let context = run_db(&state.db, move |db| {
        let Some(record) = db.get_session(&lookup, time::now())? else {
            return Ok(None);
        };
        Ok(db.session_context(&record.user_id, Some(&record.household_id))?)
    })
    .await?;
    Ok(context.map(|context| Session { context, cookie_hash: Some(hash) }))
}
