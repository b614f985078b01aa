use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{api_error, AppState};
use crate::config::DistanceMetric;
use crate::repository::{
    AnalyticsOverview, BikeStationView, JoinOverrides, MetroSeries, NearbyBike,
    SimilarStationView, SimilarityOverrides, StationFactors, StationTimeseries, StationView,
    TimeseriesOverrides,
};
use crate::spatial::JoinMethod;
use crate::temporal::Granularity;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    demo_mode: bool,
    uptime_s: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        demo_mode: state.config.app.demo_mode,
        uptime_s: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

pub async fn stations(State(state): State<Arc<AppState>>) -> Json<Vec<StationView>> {
    Json(state.repo.list_metro_stations())
}

pub async fn bike_stations(State(state): State<Arc<AppState>>) -> Json<Vec<BikeStationView>> {
    Json(state.repo.list_bike_stations())
}

#[derive(Debug, Deserialize)]
pub struct TimeseriesQuery {
    join_method: Option<JoinMethod>,
    radius_m: Option<f64>,
    nearest_k: Option<usize>,
    granularity: Option<Granularity>,
    timezone: Option<String>,
    window_days: Option<i64>,
    metro_series: Option<MetroSeries>,
}

impl From<TimeseriesQuery> for TimeseriesOverrides {
    fn from(q: TimeseriesQuery) -> Self {
        Self {
            join: JoinOverrides {
                join_method: q.join_method,
                radius_m: q.radius_m,
                nearest_k: q.nearest_k,
            },
            granularity: q.granularity,
            timezone: q.timezone,
            window_days: q.window_days,
            metro_series: q.metro_series.unwrap_or_default(),
        }
    }
}

pub async fn timeseries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<TimeseriesQuery>,
) -> ApiResult<StationTimeseries> {
    state
        .repo
        .station_timeseries(&id, &params.into())
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    join_method: Option<JoinMethod>,
    radius_m: Option<f64>,
    nearest_k: Option<usize>,
    limit: Option<usize>,
}

pub async fn nearby_bike(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<NearbyQuery>,
) -> ApiResult<Vec<NearbyBike>> {
    let overrides = JoinOverrides {
        join_method: params.join_method,
        radius_m: params.radius_m,
        nearest_k: params.nearest_k,
    };
    state
        .repo
        .nearby_bike(&id, &overrides, params.limit)
        .map(Json)
        .map_err(api_error)
}

pub async fn factors(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StationFactors> {
    state.repo.station_factors(&id).map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    top_k: Option<usize>,
    metric: Option<DistanceMetric>,
    standardize: Option<bool>,
}

pub async fn similar(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<SimilarQuery>,
) -> ApiResult<Vec<SimilarStationView>> {
    let overrides = SimilarityOverrides {
        top_k: params.top_k,
        metric: params.metric,
        standardize: params.standardize,
    };
    state
        .repo
        .similar_stations(&id, &overrides)
        .map(Json)
        .map_err(api_error)
}

pub async fn analytics_overview(State(state): State<Arc<AppState>>) -> Json<AnalyticsOverview> {
    Json(state.repo.analytics_overview())
}
