//! HTTP surface: route table, shared state and middleware.

mod auth;
pub mod error;
mod nodes;
mod projects;
mod rounds;
mod steps;

pub use error::{ApiError, ApiJson};

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::{get, MethodRouter},
    Router,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::auth::JwtKeys;
use crate::config::ServerConfig;
use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub keys: Arc<JwtKeys>,
    /// Login attempts per username
    pub login_limiter: Arc<DefaultKeyedRateLimiter<String>>,
    pub cookie_secure: bool,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: &ServerConfig, jwt_secret: &str) -> Self {
        let per_minute = NonZeroU32::new(config.login_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            db,
            keys: Arc::new(JwtKeys::new(
                jwt_secret.as_bytes(),
                config.access_token_minutes,
                config.refresh_token_days,
            )),
            login_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            cookie_secure: config.cookie_secure,
            start_time: Instant::now(),
        }
    }
}

/// Register `methods` at `path` and at `path/`.
fn both(router: Router<AppState>, path: &str, methods: MethodRouter<AppState>) -> Router<AppState> {
    router.route(path, methods.clone()).route(&format!("{}/", path), methods)
}

/// Prefix the web client uses. The same routes are also served at the root.
pub const API_PREFIX: &str = "/api/v1";

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let mut api = Router::new();
    for (path, methods) in auth::routes()
        .into_iter()
        .chain(projects::routes())
        .chain(rounds::routes())
        .chain(steps::routes())
        .chain(nodes::routes())
    {
        api = both(api, path, methods);
    }
    let router = Router::new()
        .merge(api.clone())
        .nest(API_PREFIX, api)
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
        .layer(TraceLayer::new_for_http());

    match cors_layer(&config.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}

// Unauthenticated, so it carries nothing about stored data.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

// GET /health
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.db.ping()?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn not_found_handler() -> ApiError {
    ApiError::not_found("NOT_FOUND", "no such endpoint")
}
