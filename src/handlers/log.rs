//! Log ingestion handler

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ingest::LogBatch;
use crate::middleware::auth::ServerContext;
use crate::{AppResult, AppState};

/// Raw log lines pushed by a game server
#[derive(Debug, Deserialize, Validate)]
pub struct LogRequest {
    #[validate(length(min = 1, max = 5000))]
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub accepted: usize,
}

/// Queue a batch for ingestion
pub async fn submit(
    State(state): State<AppState>,
    ctx: ServerContext,
    Json(req): Json<LogRequest>,
) -> AppResult<(StatusCode, Json<LogResponse>)> {
    req.validate()?;

    let accepted = req.lines.len();
    state.router.submit(LogBatch {
        server: ctx.server,
        lines: req.lines,
    })?;

    Ok((StatusCode::ACCEPTED, Json(LogResponse { accepted })))
}
