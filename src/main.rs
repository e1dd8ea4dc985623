use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{prelude::*, EnvFilter};

use workflow_engine::config::Config;
use workflow_engine::routes::build_router;
use workflow_engine::state::AppState;
use workflow_engine::store::FileStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    let store: Arc<dyn workflow_engine::store::Store> = Arc::new(
        FileStore::new(&config.data_dir)
            .with_context(|| format!("failed to open data directory {}", config.data_dir))?,
    );
    let state = AppState::new(store, config);

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid PORT value")?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|error| {
            tracing::error!(error = ?error, %addr, "failed to bind TCP listener");
            error
        })
        .with_context(|| format!("failed to bind TCP listener to {addr}"))?;

    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .await
        .map_err(|error| {
            tracing::error!(error = ?error, %addr, "server encountered an error");
            error
        })
        .context("server encountered an error")?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON logs; otherwise pretty
/// (spec.md §6 environment inputs, teacher convention for `RUST_LOG`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
