//! GameWarden moderation backend
//!
//! Receives raw log lines from community game servers, turns them into
//! typed events and feeds the moderation pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        GAMEWARDEN                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌────────────┐  ┌─────────────────────────┐ │
//! │  │  Log API  │  │  Event     │  │  Consumers              │ │
//! │  │  (Axum)   │─►│  Bus       │─►│  warnings, matches,     │ │
//! │  │           │  │            │  │  history writers        │ │
//! │  └───────────┘  └────────────┘  └────────────┬────────────┘ │
//! │                       ┌──────────────────────┼──────┐       │
//! │                       ▼                      ▼      ▼       │
//! │                ┌─────────────┐         ┌──────┐ ┌─────────┐ │
//! │                │ PostgreSQL  │         │ RCON │ │ Discord │ │
//! │                └─────────────┘         └──────┘ └─────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod app;
mod config;
mod db;
mod dispatch;
mod error;
mod event;
mod handlers;
mod history;
mod ingest;
mod matches;
mod middleware;
mod notify;
mod pool;
mod rcon;
mod store;
mod warning;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub use app::AppState;
pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    // Initialize logging
    let fmt_layer = if config.is_production() {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gamewarden=debug,tower_http=info".into()),
        )
        .with(fmt_layer)
        .init();

    tracing::info!("GameWarden starting...");
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    // Initialize database pool
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await.context("Failed to run migrations")?;

    let store: Arc<dyn store::Store> = Arc::new(store::postgres::PgStore::new(pool));

    // Wire the event pipeline
    let pipeline = app::Pipeline::start(&config, store)
        .await
        .context("Failed to start event pipeline")?;

    let app = create_router(pipeline.state.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let cancel = pipeline.cancel_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
                _ = cancel.cancelled() => {}
            }
        })
        .await
        .context("Server error")?;

    pipeline.shutdown(config.shutdown_grace).await;
    Ok(())
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(handlers::health::check));

    // Game server routes (server token auth)
    let server_routes = Router::new()
        .route("/api/v1/log", post(handlers::log::submit))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_server_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(server_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
