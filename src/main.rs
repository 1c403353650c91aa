mod config;
mod error;
mod game;
mod hub;
mod room;
mod scheduler;
mod scoring;
mod tracks;
mod types;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;

use crate::game::{Action, CoordinatorHandle};
use crate::hub::Hub;
use crate::tracks::Catalog;
use crate::types::*;

#[derive(Clone)]
struct AppState {
    coordinator: CoordinatorHandle,
    hub: Arc<Hub>,
}

// ─── Routes ───────────────────────────────────────────────────────

async fn room_exists(
    Path(room_code): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let exists = state.coordinator.room_exists(room_code).await;
    Json(serde_json::json!({ "exists": exists }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket connected: {}", conn_id);

    // Forward everything the coordinator addresses to this connection.
    let mut outbound = state.hub.register(&conn_id);
    let event_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    });

    // Process incoming messages
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let client_msg: ClientMsg = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", conn_id, e);
                continue;
            }
        };

        state
            .coordinator
            .send(Action::from_client(conn_id.clone(), client_msg))
            .await;
    }

    // Socket disconnected: leave transport rooms first, then let the coordinator reconcile.
    tracing::info!("WebSocket disconnected: {}", conn_id);
    event_task.abort();
    state.hub.unregister(&conn_id);
    state.coordinator.send(Action::Disconnect { conn_id }).await;
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    config::init().expect("Failed to initialize config directory");

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .expect("Invalid PORT");

    let game_config = config::load_game_config().expect("Failed to load game.json");
    let catalog = config::load_catalog().expect("Failed to load tracks.json");

    let hub = Hub::new();
    let coordinator = game::spawn(hub.clone(), Arc::new(Catalog::new(catalog)), game_config);

    let state = AppState { coordinator, hub };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/rooms/{room_code}", get(room_exists))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind");

    tracing::info!("SpotTheTrack server running on port {}", port);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
