//! HTTP surface of the meal-planning service: axum handlers built on a
//! generic resource-service template, session resolution, and the
//! middleware stack.

pub mod auth;
pub mod envelope;
pub mod error;
pub mod households;
pub mod invitations;
pub mod meal_plans;
pub mod meals;
pub mod meta;
pub mod middleware;
pub mod params;
pub mod prep_steps;
pub mod recipes;
pub mod service;
pub mod session;
pub mod uploads;
pub mod users;
pub mod valid;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use supper_db::Database;

pub use error::{ApiError, ApiResult};
pub use service::Publishers;
pub use session::AuthConfig;
pub use uploads::UploadManager;

pub const DEFAULT_PREFIX: &str = "/api/v1";
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub config: ApiConfig,
    pub publishers: Publishers,
    pub uploads: UploadManager,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Every resource route is nested under this prefix.
    pub prefix: String,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub request_timeout: Duration,
    pub body_limit: usize,
    pub auth: AuthConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.into(),
            cors_origins: Vec::new(),
            request_timeout: Duration::from_secs(30),
            body_limit: DEFAULT_BODY_LIMIT,
            auth: AuthConfig::default(),
        }
    }
}

/// The complete application: resource routes under the configured prefix,
/// health probes at the root, and the middleware stack around both.
pub fn router(state: AppState) -> Router {
    let api = Router::new();
    let api = auth::bind(api);
    let api = users::bind(api);
    let api = households::bind(api, &state);
    let api = invitations::bind(api);
    let api = valid::bind(api, &state);
    let api = recipes::bind(api, &state);
    let api = meals::bind(api, &state);
    let api = meal_plans::bind(api, &state);
    let api = prep_steps::bind(api);
    let api = webhooks::bind(api, &state);
    let api = middleware::api_layers(api, &state);

    let app = Router::new()
        .nest(&state.config.prefix, api)
        .merge(meta::routes())
        .fallback(middleware::fallback);

    middleware::outer_layers(app, &state.config).with_state(state)
}
