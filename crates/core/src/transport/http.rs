// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON handlers for the core HTTP surface. Every response carries the
//! process epoch token so clients can detect restarts and reset cursors.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{preset_for, AgentConfigPatch, AgentEntry};
use crate::buffers::feed::{Channel, FeedItem, Priority, Source};
use crate::buffers::sense::{Admission, Rect, SenseEvent, SenseInput, SenseKind};
use crate::buffers::window::{build_window, ContextWindow, DEFAULT_WINDOW_MS};
use crate::error::ApiError;
use crate::overlay::hub::StatusPatch;
use crate::state::{epoch_ms, CoreState};
use crate::trace::TraceEntry;

/// Default and maximum `limit` for history/trace queries.
const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AfterQuery {
    #[serde(default)]
    pub after: u64,
    #[serde(default)]
    pub meta_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub after: u64,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FeedPost {
    pub text: String,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Serialize)]
pub struct SenseAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<bool>,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct SenseEvents {
    pub events: Vec<SenseEvent>,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct FeedMessages {
    pub messages: Vec<FeedItem>,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct DigestResponse {
    pub ok: bool,
    pub digest: String,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub ok: bool,
    pub results: Vec<AgentEntry>,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub ok: bool,
    pub context: ContextWindow,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub ok: bool,
    pub config: crate::agent::AgentConfig,
    pub epoch: String,
}

#[derive(Debug, Serialize)]
pub struct TracesResponse {
    pub traces: Vec<TraceEntry>,
    pub epoch: String,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<CoreState>>) -> impl IntoResponse {
    let cfg = s.agent.config();
    let stats = match s.stats.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    Json(serde_json::json!({
        "ok": true,
        "epoch": s.epoch,
        "messages": s.feed.len(),
        "senseEvents": s.sense.len(),
        "overlayClients": s.hub.client_count(),
        "agent": {
            "enabled": cfg.enabled,
            "model": cfg.model,
            "lastTickMs": s.agent.last_tick_ms(),
            "historyLen": s.agent.history_len(),
            "digest": s.agent.latest_digest(),
        },
        "escalation": {
            "mode": cfg.escalation_mode,
            "cooldownMs": cfg.escalation_cooldown_ms,
            "stats": stats,
        },
        "traces": s.traces.count(),
    }))
}

/// `POST /sense` — admit a sensor event.
pub async fn sense_post(
    State(s): State<Arc<CoreState>>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let Some(kind_raw) = body.get("type").and_then(Value::as_str) else {
        return ApiError::BadRequest.to_http_response("missing field: type").into_response();
    };
    let Some(kind) = SenseKind::parse(kind_raw) else {
        return ApiError::BadRequest
            .to_http_response(format!("unknown sense type: {kind_raw}"))
            .into_response();
    };
    let Some(ts) = body.get("ts").and_then(Value::as_u64) else {
        return ApiError::BadRequest.to_http_response("missing field: ts").into_response();
    };

    let meta = body.get("meta").cloned().unwrap_or(Value::Null);
    let app = meta
        .get("app")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();
    let window_title =
        meta.get("windowTitle").and_then(Value::as_str).map(str::to_owned);
    let screen_id = meta.get("screen").and_then(Value::as_i64).unwrap_or(0) as i32;
    let ssim = meta.get("ssim").and_then(Value::as_f64).unwrap_or(1.0).clamp(0.0, 1.0);
    let ocr = body.get("ocr").and_then(Value::as_str).map(str::to_owned);

    let (image, bbox) = match body.get("roi") {
        Some(roi) => {
            let image = match roi.get("data").and_then(Value::as_str) {
                Some(data) => match STANDARD.decode(data) {
                    Ok(bytes) => Some(bytes),
                    Err(_) => {
                        return ApiError::BadRequest
                            .to_http_response("roi.data is not valid base64")
                            .into_response();
                    }
                },
                None => None,
            };
            let bbox = roi
                .get("bbox")
                .cloned()
                .and_then(|v| serde_json::from_value::<Rect>(v).ok());
            (image, bbox)
        }
        None => (None, None),
    };

    let admission = s.sense.admit(SenseInput {
        ts,
        kind,
        app,
        window_title,
        screen_id,
        ssim,
        ocr,
        image,
        bbox,
    });

    match admission {
        Admission::Admitted(event) => {
            s.agent.nudge();
            s.hub.update_state(StatusPatch {
                screen: Some("active".to_owned()),
                ..Default::default()
            });
            Json(SenseAck {
                ok: true,
                id: Some(event.id),
                deduplicated: None,
                epoch: s.epoch.clone(),
            })
            .into_response()
        }
        Admission::Deduplicated => Json(SenseAck {
            ok: true,
            id: None,
            deduplicated: Some(true),
            epoch: s.epoch.clone(),
        })
        .into_response(),
    }
}

/// `GET /sense?after=&meta_only=`
pub async fn sense_get(
    State(s): State<Arc<CoreState>>,
    Query(query): Query<AfterQuery>,
) -> impl IntoResponse {
    Json(SenseEvents {
        events: s.sense.query(query.after, query.meta_only),
        epoch: s.epoch.clone(),
    })
}

/// `GET /feed?after=`
pub async fn feed_get(
    State(s): State<Arc<CoreState>>,
    Query(query): Query<AfterQuery>,
) -> impl IntoResponse {
    Json(FeedMessages { messages: s.feed.query(query.after), epoch: s.epoch.clone() })
}

/// `POST /feed` — push a system feed item.
pub async fn feed_post(
    State(s): State<Arc<CoreState>>,
    Json(body): Json<FeedPost>,
) -> axum::response::Response {
    if body.text.trim().is_empty() {
        return ApiError::BadRequest.to_http_response("missing field: text").into_response();
    }
    let item = s.feed.push(
        body.text,
        body.priority.unwrap_or(Priority::Normal),
        Source::System,
        Channel::Stream,
    );
    s.hub.broadcast_item(&item);
    s.agent.nudge();
    Json(serde_json::json!({"ok": true, "id": item.id, "epoch": s.epoch})).into_response()
}

/// `GET /agent/digest`
pub async fn agent_digest(State(s): State<Arc<CoreState>>) -> impl IntoResponse {
    Json(DigestResponse { ok: true, digest: s.agent.latest_digest(), epoch: s.epoch.clone() })
}

/// `GET /agent/history?limit=`
pub async fn agent_history(
    State(s): State<Arc<CoreState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Json(HistoryResponse { ok: true, results: s.agent.history(limit), epoch: s.epoch.clone() })
}

/// `GET /agent/context` — the snapshot the next tick would see.
pub async fn agent_context(State(s): State<Arc<CoreState>>) -> impl IntoResponse {
    let cfg = s.agent.config();
    let window = build_window(
        &s.feed,
        &s.sense,
        preset_for(cfg.escalation_mode),
        DEFAULT_WINDOW_MS,
        epoch_ms(),
    );
    Json(ContextResponse { ok: true, context: window, epoch: s.epoch.clone() })
}

/// `GET /agent/config`
pub async fn agent_config_get(State(s): State<Arc<CoreState>>) -> impl IntoResponse {
    Json(ConfigResponse { ok: true, config: s.agent.config(), epoch: s.epoch.clone() })
}

/// `POST /agent/config` — partial runtime update.
pub async fn agent_config_post(
    State(s): State<Arc<CoreState>>,
    Json(patch): Json<AgentConfigPatch>,
) -> impl IntoResponse {
    let config = s.agent.apply_patch(patch);
    s.hub.update_state(StatusPatch {
        mode: Some(config.escalation_mode.as_str().to_owned()),
        ..Default::default()
    });
    tracing::info!(mode = config.escalation_mode.as_str(), "agent config updated");
    Json(ConfigResponse { ok: true, config, epoch: s.epoch.clone() })
}

/// `GET /traces?after=&limit=`
pub async fn traces(
    State(s): State<Arc<CoreState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Json(TracesResponse { traces: s.traces.query(query.after, limit), epoch: s.epoch.clone() })
}
