// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay WebSocket endpoint. Each connection registers with the hub,
//! relays hub frames out, and routes incoming pong/command frames back.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::overlay::hub::{ClientFrame, OverlayCommand};
use crate::state::CoreState;

/// `GET /ws` — WebSocket upgrade for overlay clients.
pub async fn overlay_ws_handler(
    State(state): State<Arc<CoreState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_overlay(state, socket))
}

/// Per-connection loop.
async fn handle_overlay(state: Arc<CoreState>, socket: WebSocket) {
    let (client_id, mut frames) = state.hub.register();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            // Hub -> client
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        let Ok(text) = serde_json::to_string(&frame) else {
                            continue;
                        };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break, // hub dropped this client
                }
            }

            // Client -> hub
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, client_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // binary/ping/pong ignored
                }
            }
        }
    }

    state.hub.remove(client_id);
}

fn handle_client_frame(state: &CoreState, client_id: u64, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Pong { ts }) => {
            state.hub.record_pong(client_id, ts);
        }
        Ok(ClientFrame::Command { action, params }) => {
            state.hub.route_command(OverlayCommand { action, params });
        }
        Err(e) => {
            tracing::debug!(client_id, err = %e, "unparsable overlay frame");
        }
    }
}
