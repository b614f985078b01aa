//! HTTP server for the station API and the map UI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use metrobikeatlas::api::{router, AppState};
use metrobikeatlas::config::Config;
use metrobikeatlas::logging::init_logging;
use metrobikeatlas::repository::StationRepository;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "serve")]
#[command(about = "Serve the MetroBike Atlas API and map UI")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    listen: String,

    /// Config file (defaults to $METROBIKEATLAS_CONFIG_PATH, then config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve the synthetic demo data set regardless of config
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    config.resolve_paths(&std::env::current_dir()?);
    if args.demo {
        config.app.demo_mode = true;
    }
    let _guard = init_logging(&config.logging)?;

    info!("{} server (demo_mode={})", config.app.name, config.app.demo_mode);

    let repo = StationRepository::for_config(&config)?;
    info!("Repository ready with {} metro stations", repo.metro_count());
    if !repo.has_features() {
        info!("Gold features missing; factors and similarity will report unavailable");
    }

    let app = router(Arc::new(AppState::new(config, repo)));

    info!("Starting server on {}", args.listen);
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
