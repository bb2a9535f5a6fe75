// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawn-task bookkeeping: dedup of repeated task dispatches, durable
//! pending-task state (atomic write + rename), and the per-task completion
//! poller. Pending tasks survive restarts; recovery re-arms their pollers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent::parse::scan_json_objects;
use crate::buffers::feed::{Channel, FeedRing, Priority, Source};
use crate::escalation::rpc::{
    extract_latest_assistant_text, extract_status, AgentRpc,
};
use crate::overlay::hub::OverlayHub;
use crate::trace::TraceLog;

/// Identical normalized tasks within this window are dropped.
pub const DISPATCH_DEDUP_WINDOW_MS: u64 = 60_000;

/// Gap between `agent.wait` polls.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-poll wait timeout passed to the agent.
const POLL_TIMEOUT_MS: u64 = 5_000;

/// Total polling budget per task.
const POLL_BUDGET: Duration = Duration::from_secs(300);

/// A dispatched task awaiting completion. Persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSpawn {
    pub run_id: String,
    pub child_session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub started_at: u64,
    #[serde(default)]
    pub polling_emitted: bool,
}

impl PendingSpawn {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("task")
    }
}

/// Pending-task table with durable storage.
pub struct SpawnTracker {
    path: PathBuf,
    pending: IndexMap<String, PendingSpawn>,
    /// Normalized task → last dispatch time. In-memory only.
    recent: HashMap<String, u64>,
}

impl SpawnTracker {
    /// Load pending tasks from disk; unreadable state starts empty.
    pub fn load(path: PathBuf) -> Self {
        let pending = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<(String, PendingSpawn)>>(&contents)
            {
                Ok(entries) => entries.into_iter().collect(),
                Err(e) => {
                    tracing::warn!(err = %e, "pending-task file unparsable, starting empty");
                    IndexMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexMap::new(),
            Err(e) => {
                tracing::warn!(err = %e, "pending-task file unreadable, starting empty");
                IndexMap::new()
            }
        };
        Self { path, pending, recent: HashMap::new() }
    }

    /// All pending tasks, insertion order. Used for restart recovery.
    pub fn pending(&self) -> Vec<PendingSpawn> {
        self.pending.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True when an identical normalized task was dispatched within the
    /// dedup window. Otherwise records this dispatch.
    pub fn check_and_note_dispatch(&mut self, normalized: &str, now: u64) -> bool {
        if let Some(&last) = self.recent.get(normalized) {
            if now.saturating_sub(last) < DISPATCH_DEDUP_WINDOW_MS {
                return true;
            }
        }
        self.recent.insert(normalized.to_owned(), now);
        false
    }

    pub fn insert(&mut self, spawn: PendingSpawn) {
        self.pending.insert(spawn.run_id.clone(), spawn);
        self.persist();
    }

    pub fn remove(&mut self, run_id: &str) {
        if self.pending.shift_remove(run_id).is_some() {
            self.persist();
        }
    }

    pub fn mark_polling(&mut self, run_id: &str) {
        if let Some(spawn) = self.pending.get_mut(run_id) {
            spawn.polling_emitted = true;
            self.persist();
        }
    }

    /// Write the table atomically: tempfile then rename.
    fn persist(&self) {
        let entries: Vec<(&String, &PendingSpawn)> = self.pending.iter().collect();
        let json = match serde_json::to_string_pretty(&entries) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(err = %e, "pending-task serialization failed");
                return;
            }
        };
        let tmp_path = self.path.with_extension("tmp");
        if let Err(e) =
            std::fs::write(&tmp_path, json).and_then(|()| std::fs::rename(&tmp_path, &self.path))
        {
            tracing::warn!(err = %e, "pending-task persistence failed");
        }
    }
}

/// Lowercase and collapse whitespace for dispatch dedup.
pub fn normalize_task(task: &str) -> String {
    task.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Wire format of a spawn dispatch message.
pub fn dispatch_message(task: &str, label: &str) -> String {
    format!("[spawn-task:{label}] {task}")
}

/// Find the first JSON object in the reply carrying `runId` and
/// `childSessionKey` (either order; snake_case tolerated).
pub fn extract_spawn_ack(text: &str) -> Option<(String, String)> {
    for object in scan_json_objects(text) {
        let run_id = string_field(&object, &["runId", "run_id"]);
        let child = string_field(&object, &["childSessionKey", "child_session_key"]);
        if let (Some(run_id), Some(child)) = (run_id, child) {
            return Some((run_id, child));
        }
    }
    None
}

fn string_field(object: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| object.get(*name))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Spawn the completion poller for one pending task.
pub fn spawn_poller(
    rpc: AgentRpc,
    tracker: Arc<Mutex<SpawnTracker>>,
    spawn: PendingSpawn,
    feed: Arc<FeedRing>,
    hub: Arc<OverlayHub>,
    traces: Arc<TraceLog>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let run_id = spawn.run_id.clone();
        let label = spawn.label().to_owned();

        if !spawn.polling_emitted {
            let item = feed.push(
                format!("spawned task '{label}' running"),
                Priority::Normal,
                Source::System,
                Channel::Stream,
            );
            hub.broadcast_item(&item);
            lock_tracker(&tracker).mark_polling(&run_id);
        }

        let deadline = tokio::time::Instant::now() + POLL_BUDGET;
        let mut timer = tokio::time::interval(POLL_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return, // stays on disk for recovery
                _ = timer.tick() => {}
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(run_id = %run_id, "spawn task polling budget exhausted");
                lock_tracker(&tracker).remove(&run_id);
                return;
            }

            let reply = match rpc
                .call(
                    "agent.wait",
                    serde_json::json!({"run_id": run_id, "timeout_ms": POLL_TIMEOUT_MS}),
                    POLL_INTERVAL + Duration::from_secs(2),
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!(run_id = %run_id, err = %e, "spawn wait transport error");
                    continue; // retry on the next tick
                }
            };

            let status = reply
                .payload
                .as_ref()
                .and_then(extract_status)
                .unwrap_or_else(|| if reply.ok { "ok".to_owned() } else { "error".to_owned() });

            match status.as_str() {
                "ok" | "completed" => {
                    deliver_result(&rpc, &spawn, &label, &feed, &hub, &traces).await;
                    lock_tracker(&tracker).remove(&run_id);
                    return;
                }
                "error" | "failed" => {
                    tracing::warn!(run_id = %run_id, status = %status, "spawn task failed");
                    lock_tracker(&tracker).remove(&run_id);
                    return;
                }
                _ => {} // "timeout" and anything else: keep polling
            }
        }
    });
}

async fn deliver_result(
    rpc: &AgentRpc,
    spawn: &PendingSpawn,
    label: &str,
    feed: &FeedRing,
    hub: &OverlayHub,
    traces: &TraceLog,
) {
    let history = rpc
        .call(
            "chat.history",
            serde_json::json!({"session_key": spawn.child_session_key, "limit": 10}),
            Duration::from_secs(10),
        )
        .await;

    let text = match history {
        Ok(reply) => reply
            .payload
            .as_ref()
            .and_then(extract_latest_assistant_text)
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!(run_id = %spawn.run_id, err = %e, "chat.history fetch failed");
            String::new()
        }
    };

    if text.is_empty() {
        tracing::debug!(run_id = %spawn.run_id, "spawn task completed with no text");
        return;
    }

    let item = feed.push(
        format!("{label}:\n{text}"),
        Priority::High,
        Source::Openclaw,
        Channel::Agent,
    );
    hub.broadcast_item(&item);
    traces.record(
        "spawn.completed",
        serde_json::json!({"runId": spawn.run_id, "label": label, "chars": text.len()}),
    );
}

fn lock_tracker(tracker: &Arc<Mutex<SpawnTracker>>) -> std::sync::MutexGuard<'_, SpawnTracker> {
    match tracker.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
