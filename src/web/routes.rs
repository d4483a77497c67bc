use axum::{routing::get, Router};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// REST surface: the WhatsApp webhook pair plus a health probe.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/webhook",
            get(handlers::webhook::verify).post(handlers::webhook::receive),
        )
        .route("/health", get(handlers::status::health))
}
