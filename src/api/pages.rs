//! HTML pages and static assets of the map UI.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing::debug;

use super::AppState;

const PAGES: [(&str, &str); 4] = [
    ("/home", "home.html"),
    ("/explorer", "explorer.html"),
    ("/insights", "insights.html"),
    ("/about", "about.html"),
];

async fn root_redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/home")])
}

async fn no_favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub fn mount(router: Router<Arc<AppState>>, static_dir: &Path) -> Router<Arc<AppState>> {
    let mut router = router.route("/", get(root_redirect));
    for (route, file) in PAGES {
        router = router.route_service(route, ServeFile::new(static_dir.join(file)));
    }

    let favicon = static_dir.join("favicon.ico");
    router = if favicon.is_file() {
        router.route_service("/favicon.ico", ServeFile::new(favicon))
    } else {
        router.route("/favicon.ico", get(no_favicon))
    };

    let assets = static_dir.join("static");
    if assets.is_dir() {
        router.nest_service("/static", ServeDir::new(assets))
    } else {
        debug!("No asset dir at {}; /static is not mounted", assets.display());
        router
    }
}
