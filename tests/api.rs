use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use metrobikeatlas::api::{router, AppState};
use metrobikeatlas::config::Config;
use metrobikeatlas::repository::StationRepository;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{Builder, TempDir};
use tower::ServiceExt;

fn demo_app(static_dir: &Path) -> Router {
    let mut config = Config::default();
    config.web.static_dir = static_dir.to_path_buf();
    config.paths.bronze_dir = static_dir.join("bronze");
    config.paths.silver_dir = static_dir.join("silver");
    let end = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    let repo = StationRepository::demo_at(&config, end).expect("demo repository");
    router(Arc::new(AppState::new(config, repo)))
}

fn web_dir() -> TempDir {
    let dir = Builder::new().prefix("atlas-web-").tempdir().unwrap();
    fs::write(dir.path().join("home.html"), "<html>home</html>").unwrap();
    fs::create_dir(dir.path().join("static")).unwrap();
    fs::write(dir.path().join("static").join("app.js"), "console.log(1);").unwrap();
    dir
}

async fn get(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("router request failed");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    (status, headers, String::from_utf8_lossy(&bytes).to_string())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(app, uri).await;
    let value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    (status, value)
}

#[tokio::test]
async fn test_health_and_config() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["demo_mode"], true);

    let (status, body) = get_json(&app, "/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["spatial"]["join_method"], "buffer");
    assert_eq!(body["temporal"]["timezone"], "Asia/Taipei");
    assert!(body["map"]["zoom"].is_number());
}

#[tokio::test]
async fn test_station_lists() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) = get_json(&app, "/stations").await;
    assert_eq!(status, StatusCode::OK);
    let stations = body.as_array().unwrap();
    assert_eq!(stations.len(), 3);
    assert_eq!(stations[0]["id"], "MRT_TAIPEI_MAIN");
    assert!(stations[0]["cluster"].is_number());

    let (_, body) = get_json(&app, "/bike_stations").await;
    assert_eq!(body.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_nearby_bike() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) = get_json(&app, "/station/MRT_TAIPEI_MAIN/nearby_bike").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["BIKE_0001", "BIKE_0002"]);

    let (_, body) = get_json(
        &app,
        "/station/MRT_TAIPEI_MAIN/nearby_bike?join_method=nearest&nearest_k=4&limit=3",
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_timeseries() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) = get_json(&app, "/station/MRT_TAIPEI_MAIN/timeseries").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granularity"], "hour");
    let series = body["series"].as_array().unwrap();
    assert_eq!(series[0]["metric"], "metro_ridership");
    assert_eq!(series[1]["metric"], "bike_available_bikes_total");
    assert!(!series[1]["points"].as_array().unwrap().is_empty());
    assert_eq!(body["meta"]["bike_stations"], 2);

    let (status, body) = get_json(
        &app,
        "/station/MRT_TAIPEI_MAIN/timeseries?metro_series=proxy&granularity=day",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["series"][0]["is_proxy"], true);
    assert_eq!(body["granularity"], "day");
}

#[tokio::test]
async fn test_timeseries_huge_window_keeps_all_rows() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) =
        get_json(&app, "/station/MRT_TAIPEI_MAIN/timeseries?window_days=100000000").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["series"][1]["points"].as_array().unwrap().is_empty());

    let (status, _) = get_json(&app, "/station/MRT_TAIPEI_MAIN/timeseries?window_days=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_errors_map_to_status_codes() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, _) = get_json(&app, "/station/NOPE/timeseries").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/station/NOPE/factors").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/station/MRT_TAIPEI_MAIN/timeseries?radius_m=-5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        get_json(&app, "/station/MRT_TAIPEI_MAIN/timeseries?timezone=Nowhere/City").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&app, "/station/MRT_TAIPEI_MAIN/nearby_bike?radius_m=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&app, "/station/MRT_TAIPEI_MAIN/similar?metric=manhattan").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_factors_similar_and_overview() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) = get_json(&app, "/station/MRT_CITY_HALL/factors").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert!(!body["factors"].as_array().unwrap().is_empty());

    let (status, body) =
        get_json(&app, "/station/MRT_CITY_HALL/similar?top_k=1&metric=cosine").await;
    assert_eq!(status, StatusCode::OK);
    let similar = body.as_array().unwrap();
    assert_eq!(similar.len(), 1);
    assert_ne!(similar[0]["id"], "MRT_CITY_HALL");

    let (status, body) = get_json(&app, "/analytics/overview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);
    assert!(!body["clusters"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_reports_missing_silver() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, body) = get_json(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["demo_mode"], true);
    assert_eq!(body["silver_tables"].as_array().unwrap().len(), 5);
    assert!(body["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a.as_str().unwrap().contains("metro_stations.csv")));
}

#[tokio::test]
async fn test_pages_and_assets() {
    let web = web_dir();
    let app = demo_app(web.path());

    let (status, headers, _) = get(&app, "/").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::LOCATION], "/home");

    let (status, _, body) = get(&app, "/home").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("home"));

    let (status, _, _) = get(&app, "/explorer").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = get(&app, "/static/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("console.log"));

    let (status, _, _) = get(&app, "/favicon.ico").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_static_not_mounted_without_dir() {
    let dir = Builder::new().prefix("atlas-web-").tempdir().unwrap();
    let app = demo_app(dir.path());
    let (status, _, _) = get(&app, "/static/app.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
