// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the core server. Everything mounts on
//! one shared listener; the overlay WebSocket lives at `/ws`.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::CoreState;

/// Cap on sensor POST bodies.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Build the axum `Router` with all core routes.
pub fn build_router(state: Arc<CoreState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/sense", get(http::sense_get).post(http::sense_post))
        .route("/feed", get(http::feed_get).post(http::feed_post))
        .route("/agent/digest", get(http::agent_digest))
        .route("/agent/history", get(http::agent_history))
        .route("/agent/context", get(http::agent_context))
        .route("/agent/config", get(http::agent_config_get).post(http::agent_config_post))
        .route("/traces", get(http::traces))
        .route("/ws", get(ws::overlay_ws_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
