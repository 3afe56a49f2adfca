//! WebSocket relay + REST status endpoints for browser renderers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::hub::EventHub;
use crate::error::Result;

/// Build the relay router: `/ws`, `/health`, `/api/status`.
pub fn event_routes(hub: Arc<EventHub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

/// Bind the relay and serve it in the background. Port 0 picks a free port.
pub async fn serve_relay(hub: Arc<EventHub>, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let app = event_routes(hub);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Relay server stopped");
        }
    });
    info!(addr = %local, "Event relay listening");
    Ok((local, handle))
}

// ── REST ────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "design-assist-relay"
    }))
}

async fn status(State(hub): State<Arc<EventHub>>) -> impl IntoResponse {
    Json(hub.status())
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<EventHub>>) -> impl IntoResponse {
    info!("Relay client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, hub))
}

fn sync_message(hub: &EventHub) -> Option<String> {
    serde_json::to_string(&serde_json::json!({
        "type": "sync",
        "status": hub.status(),
    }))
    .ok()
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<EventHub>) {
    // Subscribe before the sync so nothing published in between is lost
    let mut rx = hub.subscribe();

    if let Some(json) = sync_message(&hub) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            warn!("Failed to send initial sync, client disconnected");
            return;
        }
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "Relay client lagged behind broadcast");
                        if let Some(json) = sync_message(&hub) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    // The relay is one-way; client text is ignored
                    _ => {}
                }
            }
        }
    }

    debug!("Relay connection closed");
}
