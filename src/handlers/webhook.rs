use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::InboundEvent;
use crate::services::conversation;
use crate::state::AppState;

const SECRET_HEADER: &str = "x-webhook-secret";

// POST /webhook/events
pub async fn events_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<InboundEvent>,
) -> Response {
    // Empty secret disables the check (local development).
    if !state.config.webhook_secret.is_empty() {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != state.config.webhook_secret {
            tracing::warn!(subject = event.subject, "rejected event with bad webhook secret");
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"error": "invalid webhook secret"})),
            )
                .into_response();
        }
    }

    let subject = event.subject;
    tracing::info!(subject, kind = event.kind(), "incoming event");

    let now = chrono::Local::now().naive_local();
    let replies = match conversation::handle_event(&state, event, now).await {
        Ok(replies) => replies,
        Err(e) => {
            if e.is_recoverable() {
                tracing::info!(subject, error = %e, "event rejected");
            } else {
                tracing::error!(subject, error = %e, "event processing failed");
            }
            vec![conversation::error_reply(subject, &e)]
        }
    };

    let mut delivered = 0;
    for reply in &replies {
        match state.messaging.send_message(reply).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::error!(subject, error = %e, "failed to send reply"),
        }
    }

    Json(serde_json::json!({
        "ok": true,
        "replies": replies.len(),
        "delivered": delivered,
    }))
    .into_response()
}
