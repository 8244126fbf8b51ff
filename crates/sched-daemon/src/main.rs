//! sched-daemon entry point.
//!
//! Intentionally thin: load config, connect to the database, build the
//! shared state, wire middleware, start the HTTP server. All route
//! handlers live in `routes.rs`; all shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::Method;
use sched_config::SchedulerConfig;
use sched_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let pool = sched_db::connect_from_env().await?;
    sched_db::migrate(&pool).await?;

    let config = load_config()?;

    let shared = Arc::new(state::AppState::new(pool.clone(), config));

    // `spawn_tick_loop` takes its own owned config snapshot rather than the
    // handle: a config reload via the admin surface will not reach an
    // already-running tick loop until the daemon restarts.
    let tick_config = (*shared.config.current().await).clone();
    sched_supervisor::spawn_tick_loop(pool, tick_config, shared.bus.clone());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_for_workers());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8799)));
    info!("sched-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Merge `SCHED_CONFIG_PATHS` (comma-separated YAML layers) if set,
/// falling back to built-in defaults when no config files are provided.
fn load_config() -> anyhow::Result<SchedulerConfig> {
    let Ok(paths_env) = std::env::var("SCHED_CONFIG_PATHS") else {
        return Ok(SchedulerConfig::default());
    };
    let paths: Vec<&str> = paths_env.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if paths.is_empty() {
        return Ok(SchedulerConfig::default());
    }
    let loaded = sched_config::load_layered_yaml(&paths)?;
    info!(config_hash = %loaded.config_hash, "loaded layered scheduler config");
    serde_json::from_value(loaded.config_json).context("parse merged scheduler config")
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("SCHED_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: workers and admin tooling are trusted callers on the internal
/// network, but the method set stays explicit rather than wildcard.
fn cors_for_workers() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
        .max_age(Duration::from_secs(3600))
}
