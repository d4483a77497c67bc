use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::Error;
use crate::web::state::AppState;
use crate::whatsapp::message::{format_reply, process_text_for_whatsapp};
use crate::whatsapp::payload;

/// Webhook verification handshake: echo the challenge when the mode and
/// token match, refuse otherwise.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned();

    match (mode, token, challenge) {
        (Some("subscribe"), Some(token), Some(challenge))
            if token == state.config.whatsapp.verify_token =>
        {
            info!("Webhook verified successfully");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            error!("Webhook verification failed");
            (
                StatusCode::FORBIDDEN,
                Json(json!({"status": "error", "message": "Verification failed"})),
            )
                .into_response()
        }
    }
}

/// Inbound message handler: validate the payload shape, run the question
/// through the pipeline, post the formatted reply back.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !payload::is_valid_whatsapp_message(&body) {
        let rejected = Error::InputRejected("Not a WhatsApp API event".to_string());
        error!("{}", rejected);
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "Not a WhatsApp API event"})),
        );
    }

    let Some(message) = payload::extract_message(&body) else {
        // Valid envelope but not a text message (status updates land here too).
        info!("Ignoring non-text webhook event");
        return (StatusCode::OK, Json(json!({"status": "ok"})));
    };

    info!("Message from {} ({})", message.name, message.wa_id);

    let thread_id = match state.sessions.thread_for(&message.wa_id) {
        Ok(thread_id) => thread_id,
        Err(e) => {
            error!("Session store failure: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "Session store failure"})),
            );
        }
    };

    let outcome = match state.workflow.answer(&message.text, &thread_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Pipeline failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": e.to_string()})),
            );
        }
    };

    let reply = process_text_for_whatsapp(&format_reply(&outcome));

    match state.whatsapp.send_text(&message.wa_id, &reply).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(Error::TransportFailure { message, timeout: true }) => (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({"status": "error", "message": message})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": e.to_string()})),
        ),
    }
}
