//! Health check handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::event::bus::SubscriberStats;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
    /// Servers with a running ingestion task
    servers: usize,
    subscribers: Vec<SubscriberStats>,
}

pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
        servers: state.router.route_count(),
        subscribers: state.bus.stats(),
    })
}
