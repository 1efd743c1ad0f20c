//! HTTP and websocket handlers.

use crate::database::Database;
use crate::host::{HostCommand, HostStatus};
use crate::transport::WsHub;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    pub hub: WsHub,
    pub commands: mpsc::Sender<HostCommand>,
    pub status: Arc<RwLock<HostStatus>>,
    pub db: Database,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    host: HostStatus,
    connections: usize,
    saves: usize,
}

/// Get server statistics
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let host = state.status.read().clone();
    let saves = state.db.list().await?.len();

    Ok(Json(StatsResponse {
        host,
        connections: state.hub.connection_count(),
        saves,
    }))
}

/// The current map in its save format
pub async fn get_map(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (reply, map) = oneshot::channel();
    state
        .commands
        .send(HostCommand::Map(reply))
        .await
        .map_err(|_| ApiError::Unavailable("simulation stopped".to_string()))?;
    let bytes = map
        .await
        .map_err(|_| ApiError::Unavailable("simulation stopped".to_string()))??;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

/// Save the world now
pub async fn save(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let (reply, done) = oneshot::channel();
    state
        .commands
        .send(HostCommand::Save(reply))
        .await
        .map_err(|_| ApiError::Unavailable("simulation stopped".to_string()))?;
    done.await
        .map_err(|_| ApiError::Unavailable("simulation stopped".to_string()))??;
    Ok(StatusCode::NO_CONTENT)
}

/// Participant endpoint: binary frames carry encoded session messages
pub async fn session_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state.hub))
}

async fn serve_socket(socket: WebSocket, hub: WsHub) {
    let (peer, mut outbound) = hub.join();
    info!(peer = %peer, "Participant connected");
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            if sink.send(WsMessage::Binary(bytes)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Binary(bytes)) => hub.receive(peer, bytes),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer, error = %e, "Socket error");
                break;
            }
        }
    }

    hub.leave(peer);
    writer.abort();
    info!(peer = %peer, "Participant disconnected");
}

// Error handling
pub enum ApiError {
    Internal(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        (status, message).into_response()
    }
}

impl From<delve_core::Error> for ApiError {
    fn from(err: delve_core::Error) -> Self {
        error!("Core error: {}", err);
        ApiError::Internal(err.to_string())
    }
}
