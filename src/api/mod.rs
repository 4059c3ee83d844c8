//! REST API module using Axum
//!
//! Telemetry ingest, read-only views of the analyst and the operator
//! commands, all under `/api/v1` and wrapped in the envelope from
//! [`envelope`].
//!
//! | Method | Path              | Purpose                                |
//! |--------|-------------------|----------------------------------------|
//! | GET    | `/health`         | store reachability and agent state     |
//! | GET    | `/status`         | latest status snapshot                 |
//! | GET    | `/insights`       | insights filtered by type, band, age   |
//! | GET    | `/baselines`      | current baseline per (band, period)    |
//! | GET    | `/events`         | bootstrap events and live anomalies    |
//! | POST   | `/samples`        | ingest one controller sample or a list |
//! | POST   | `/bootstrap`      | start a bootstrap (409 if running)     |
//! | POST   | `/analysis/force` | run a cycle now and reset the timer    |
//! | PUT    | `/interval`       | `{ "minutes": 1..=30 }`                |
//! | PUT    | `/ai`             | `{ "enabled": bool }`                  |

pub mod envelope;
pub mod handlers;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Environment variable with a comma-separated list of allowed CORS origins
pub const CORS_ORIGINS_ENV: &str = "ANALYST_CORS_ORIGINS";

fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        // Same-origin only
        Err(_) => base,
    }
}

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/insights", get(handlers::insights))
        .route("/baselines", get(handlers::baselines))
        .route("/events", get(handlers::events))
        .route("/samples", post(handlers::ingest_samples))
        .route("/bootstrap", post(handlers::trigger_bootstrap))
        .route("/analysis/force", post(handlers::force_analysis))
        .route("/interval", put(handlers::set_interval))
        .route("/ai", put(handlers::set_ai))
        .with_state(state)
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
