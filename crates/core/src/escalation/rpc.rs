// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent JSON-RPC client over WebSocket for the openclaw agent.
//!
//! One background task owns the connection and reconnects with exponential
//! backoff. Requests are stamped with a correlation id and their responses
//! routed back to the originating caller; requests in flight when the
//! connection drops fail fast so callers can take the HTTP fallback.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Default budget for one `agent.call` round trip.
pub const RPC_BUDGET: Duration = Duration::from_secs(30);

/// Decoded RPC response envelope.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub ok: bool,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

struct RpcRequest {
    method: String,
    params: Value,
    respond: oneshot::Sender<anyhow::Result<RpcReply>>,
}

/// Handle to the agent RPC worker.
#[derive(Clone)]
pub struct AgentRpc {
    req_tx: mpsc::UnboundedSender<RpcRequest>,
}

impl AgentRpc {
    /// Spawn the worker and return a cloneable handle.
    pub fn connect(url: String, cancel: CancellationToken) -> Self {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(url, req_rx, cancel));
        Self { req_tx }
    }

    /// Issue one RPC and await its reply within `budget`.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        budget: Duration,
    ) -> anyhow::Result<RpcReply> {
        let (respond, rx) = oneshot::channel();
        self.req_tx
            .send(RpcRequest { method: method.to_owned(), params, respond })
            .map_err(|_| anyhow!("agent rpc worker stopped"))?;
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("agent rpc worker dropped request")),
            Err(_) => Err(anyhow!("agent rpc timed out after {}ms", budget.as_millis())),
        }
    }
}

async fn run_loop(
    url: String,
    mut req_rx: mpsc::UnboundedReceiver<RpcRequest>,
    cancel: CancellationToken,
) {
    let mut backoff_ms = 100u64;
    let max_backoff_ms = 5_000u64;
    let mut next_id: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                backoff_ms = 100;
                tracing::debug!("agent WS connected");

                let (mut write, mut read) = ws_stream.split();
                let mut pending: HashMap<u64, oneshot::Sender<anyhow::Result<RpcReply>>> =
                    HashMap::new();

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,

                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    route_reply(&mut pending, text.as_str());
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::debug!("agent WS closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    tracing::debug!(err = %e, "agent WS error");
                                    break;
                                }
                                _ => {} // ping/pong/binary ignored
                            }
                        }

                        req = req_rx.recv() => {
                            match req {
                                Some(request) => {
                                    next_id += 1;
                                    let frame = serde_json::json!({
                                        "id": next_id,
                                        "method": request.method,
                                        "params": request.params,
                                    });
                                    let Ok(text) = serde_json::to_string(&frame) else {
                                        let _ = request
                                            .respond
                                            .send(Err(anyhow!("unserializable rpc frame")));
                                        continue;
                                    };
                                    pending.insert(next_id, request.respond);
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        tracing::debug!("agent WS write failed");
                                        break;
                                    }
                                }
                                None => return, // handle dropped
                            }
                        }
                    }
                }

                // Connection gone: in-flight replies were lost. Fail fast so
                // callers can fall back instead of waiting out their budget.
                for (_, respond) in pending.drain() {
                    let _ = respond.send(Err(anyhow!("agent ws disconnected")));
                }
            }
            Err(e) => {
                tracing::debug!(err = %e, backoff_ms, "agent WS connect failed, retrying");
            }
        }

        // Backoff before reconnect, answering incoming requests with an
        // error meanwhile.
        let wait = tokio::time::sleep(Duration::from_millis(backoff_ms));
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut wait => break,
                req = req_rx.recv() => {
                    match req {
                        Some(request) => {
                            let _ = request.respond.send(Err(anyhow!("agent ws unavailable")));
                        }
                        None => return,
                    }
                }
            }
        }
        backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
    }
}

fn route_reply(
    pending: &mut HashMap<u64, oneshot::Sender<anyhow::Result<RpcReply>>>,
    text: &str,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        return; // unsolicited event; the broker has no subscribers for these
    };
    let Some(respond) = pending.remove(&id) else {
        return;
    };
    let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
    let payload = value.get("payload").cloned().filter(|p| !p.is_null());
    let error = value.get("error").map(|e| match e.as_str() {
        Some(text) => text.to_owned(),
        None => e.to_string(),
    });
    let _ = respond.send(Ok(RpcReply { ok, payload, error }));
}

// -- Payload shapes ------------------------------------------------------------

/// Concatenate the nonempty `text` fields of `payload.result.payloads`.
pub fn extract_payload_texts(payload: &Value) -> String {
    let payloads = payload
        .get("result")
        .and_then(|r| r.get("payloads"))
        .or_else(|| payload.get("payloads"))
        .and_then(Value::as_array);
    let Some(payloads) = payloads else {
        return String::new();
    };
    let texts: Vec<&str> = payloads
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    texts.join("\n")
}

/// Status string from an `agent.wait` payload.
pub fn extract_status(payload: &Value) -> Option<String> {
    payload
        .get("result")
        .and_then(|r| r.get("status"))
        .or_else(|| payload.get("status"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Latest assistant message text from a `chat.history` payload. Message
/// content may be a plain string or an array of text blocks.
pub fn extract_latest_assistant_text(payload: &Value) -> Option<String> {
    let messages = payload
        .get("result")
        .and_then(|r| r.get("messages"))
        .or_else(|| payload.get("messages"))
        .and_then(Value::as_array)?;

    messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .and_then(message_text)
}

fn message_text(message: &Value) -> Option<String> {
    match message.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(blocks)) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) != Some("tool_use"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
