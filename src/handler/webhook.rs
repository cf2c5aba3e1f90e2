use crate::app::AppState;
use crate::webhook::WebhookEnvelope;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use tracing::{error, info, warn};

/// Acknowledges every delivery; processing happens on the webhook queue.
///
/// The body is parsed by hand so a malformed delivery is still answered with
/// 200 and never retried by the provider.
pub async fn webhook_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match serde_json::from_slice::<WebhookEnvelope>(&body) {
        Ok(WebhookEnvelope { data: Some(data) }) => {
            info!(
                event_type = data.event_type,
                event_id = data.id.as_deref().unwrap_or_default(),
                "webhook received"
            );
            if let Err(e) = state.webhook_sender.send(data) {
                error!(
                    event_type = e.0.event_type,
                    "webhook queue closed, event dropped"
                );
            }
        }
        Ok(WebhookEnvelope { data: None }) => {
            warn!("webhook without data");
        }
        Err(e) => {
            warn!(len = body.len(), "malformed webhook body: {}", e);
        }
    }
    Json(json!({ "received": true })).into_response()
}
