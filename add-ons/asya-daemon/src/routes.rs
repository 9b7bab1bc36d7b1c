//! WebSocket transport into the session registry.
//!
//! - `GET /events`: ARI event stream, one JSON document per text frame.
//! - `GET /media/:call_id`: caller audio, little-endian 16-bit PCM per binary frame.

use asya_voice::{decode_ari_event, pcm_from_le_bytes, CallEvent, SessionRegistry};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/calls", get(calls))
        .route("/events", get(events_ws))
        .route("/media/:call_id", get(media_ws))
        .with_state(registry)
}

async fn health() -> &'static str {
    "OK"
}

/// Live call ids.
async fn calls(State(registry): State<Arc<SessionRegistry>>) -> Json<Vec<String>> {
    Json(registry.active_calls())
}

async fn events_ws(ws: WebSocketUpgrade, State(registry): State<Arc<SessionRegistry>>) -> Response {
    ws.on_upgrade(move |socket| pump_events(socket, registry))
}

async fn pump_events(mut socket: WebSocket, registry: Arc<SessionRegistry>) {
    info!("event stream connected");
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => match decode_ari_event(&text) {
                Ok(Some(event)) => registry.dispatch(event),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "undecodable event frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("event stream closed");
}

async fn media_ws(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(registry): State<Arc<SessionRegistry>>,
) -> Response {
    ws.on_upgrade(move |socket| pump_media(socket, call_id, registry))
}

async fn pump_media(mut socket: WebSocket, call_id: String, registry: Arc<SessionRegistry>) {
    debug!(call_id = %call_id, "media stream connected");
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Binary(bytes) => {
                let samples = pcm_from_le_bytes(&bytes);
                if samples.is_empty() {
                    continue;
                }
                registry.dispatch(CallEvent::Audio {
                    call_id: call_id.clone(),
                    samples,
                });
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!(call_id = %call_id, "media stream closed");
}
