//! HTTP API over a [`StationRepository`].

mod handlers;
mod pages;
mod status;

pub use status::{collect_status, SilverTableStatus, StatusResponse, STALE_AVAILABILITY_MINUTES};

use axum::{http::StatusCode, routing::get, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::AtlasError;
use crate::repository::StationRepository;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub repo: StationRepository,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config, repo: StationRepository) -> Self {
        Self {
            config,
            repo,
            started_at: Utc::now(),
        }
    }
}

pub(crate) fn api_error(e: AtlasError) -> (StatusCode, String) {
    match e {
        AtlasError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        AtlasError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        AtlasError::Internal(err) => {
            tracing::error!("Request failed: {:#}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(status::config_handler))
        .route("/status", get(status::status_handler))
        .route("/stations", get(handlers::stations))
        .route("/bike_stations", get(handlers::bike_stations))
        .route("/station/{id}/timeseries", get(handlers::timeseries))
        .route("/station/{id}/nearby_bike", get(handlers::nearby_bike))
        .route("/station/{id}/factors", get(handlers::factors))
        .route("/station/{id}/similar", get(handlers::similar))
        .route("/analytics/overview", get(handlers::analytics_overview));

    pages::mount(api, &state.config.web.static_dir)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
