use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub status: &'static str,
    pub version: String,
    pub uptime_seconds: i64,
    pub table_count: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let table_count = match state.db.table_names().await {
        Ok(tables) => tables.len(),
        Err(e) => {
            error!("Failed to count tables: {}", e);
            0
        }
    };

    Json(SystemStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
        table_count,
    })
}
