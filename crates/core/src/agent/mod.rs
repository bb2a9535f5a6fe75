// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent loop: a debounced, cadence-controlled analyzer that turns the
//! current context window into a digest + HUD line via the analysis model.
//!
//! Tick state machine:
//! `IDLE → NUDGED → WAITING(debounce) → BUILDING → CALLING → PARSING → APPLIED`.
//! Re-nudges during WAITING extend the debounce, bounded by
//! `max_interval_ms` since the previous analysis. Failures defer the next
//! analysis with exponential back-off. Every tick ends with either an
//! [`AgentEntry`] or a logged skip; nothing escapes the loop.

pub mod analyzer;
pub mod parse;
pub mod prompt;
pub mod score;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::analyzer::{Analyzer, ANALYSIS_TIMEOUT};
use crate::agent::parse::RecordDirective;
use crate::buffers::feed::{FeedRing, Priority};
use crate::buffers::sense::SenseRing;
use crate::buffers::window::{build_window, ContextWindow, Preset, DEFAULT_WINDOW_MS};
use crate::config::{EscalationMode, MIN_ESCALATION_COOLDOWN_MS};
use crate::overlay::hub::OverlayHub;
use crate::state::epoch_ms;
use crate::trace::TraceLog;

/// Retained agent-tick history length.
pub const HISTORY_CAPACITY: usize = 50;

/// Runtime agent configuration. Read-mostly; updates swap the whole value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub enabled: bool,
    pub model: String,
    pub debounce_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub situation_path: Option<PathBuf>,
    pub escalation_mode: EscalationMode,
    pub escalation_cooldown_ms: u64,
}

/// Partial config update accepted by `POST /agent/config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigPatch {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub debounce_ms: Option<u64>,
    pub min_interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub escalation_mode: Option<EscalationMode>,
    pub escalation_cooldown_ms: Option<u64>,
}

/// One completed tick.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEntry {
    pub id: u64,
    pub ts: u64,
    pub digest: String,
    pub hud: String,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordDirective>,
}

/// A finished analysis handed to the escalator.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub entry: AgentEntry,
    pub window: ContextWindow,
}

/// Context richness derived from the escalation mode.
pub fn preset_for(mode: EscalationMode) -> Preset {
    match mode {
        EscalationMode::Off | EscalationMode::Selective => Preset::Lean,
        EscalationMode::Focus => Preset::Standard,
        EscalationMode::Rich => Preset::Rich,
    }
}

struct Shared {
    config: RwLock<AgentConfig>,
    history: Mutex<VecDeque<AgentEntry>>,
    nudge: Notify,
    last_tick_ms: AtomicU64,
}

/// Cloneable handle to the agent loop's shared state.
#[derive(Clone)]
pub struct AgentHandle {
    shared: Arc<Shared>,
}

impl AgentHandle {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
                nudge: Notify::new(),
                last_tick_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> AgentConfig {
        match self.shared.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply a partial update and return the effective config. The
    /// escalation-cooldown floor and `max >= min` are enforced here.
    pub fn apply_patch(&self, patch: AgentConfigPatch) -> AgentConfig {
        let mut guard = match self.shared.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(enabled) = patch.enabled {
            guard.enabled = enabled;
        }
        if let Some(model) = patch.model {
            guard.model = model;
        }
        if let Some(debounce_ms) = patch.debounce_ms {
            guard.debounce_ms = debounce_ms;
        }
        if let Some(min_interval_ms) = patch.min_interval_ms {
            guard.min_interval_ms = min_interval_ms;
        }
        if let Some(max_interval_ms) = patch.max_interval_ms {
            guard.max_interval_ms = max_interval_ms;
        }
        if let Some(mode) = patch.escalation_mode {
            guard.escalation_mode = mode;
        }
        if let Some(cooldown) = patch.escalation_cooldown_ms {
            guard.escalation_cooldown_ms = cooldown.max(MIN_ESCALATION_COOLDOWN_MS);
        }
        guard.max_interval_ms = guard.max_interval_ms.max(guard.min_interval_ms);
        guard.clone()
    }

    /// Signal that new context arrived. Coalesces into a single pending
    /// wake-up; IDLE → NUDGED.
    pub fn nudge(&self) {
        self.shared.nudge.notify_one();
    }

    pub(crate) async fn nudged(&self) {
        self.shared.nudge.notified().await;
    }

    pub(crate) fn push_entry(&self, entry: AgentEntry) {
        self.shared.last_tick_ms.store(entry.ts, Ordering::Relaxed);
        let mut history = match self.shared.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// Up to `limit` entries, newest first.
    pub fn history(&self, limit: usize) -> Vec<AgentEntry> {
        let history = match self.shared.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn latest_digest(&self) -> String {
        self.history(1).first().map(|e| e.digest.clone()).unwrap_or_default()
    }

    /// Digests of the `n` most recent ticks, newest first.
    pub fn recent_digests(&self, n: usize) -> Vec<String> {
        self.history(n).into_iter().map(|e| e.digest).collect()
    }

    /// Timestamp of the first pushed entry strictly after `ts`.
    pub fn first_pushed_after(&self, ts: u64) -> Option<u64> {
        let history = match self.shared.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().find(|e| e.pushed && e.ts > ts).map(|e| e.ts)
    }

    pub fn last_tick_ms(&self) -> u64 {
        self.shared.last_tick_ms.load(Ordering::Relaxed)
    }

    pub fn history_len(&self) -> usize {
        match self.shared.history.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// The agent loop task.
pub struct AgentLoop {
    pub handle: AgentHandle,
    pub feed: Arc<FeedRing>,
    pub sense: Arc<SenseRing>,
    pub hub: Arc<OverlayHub>,
    pub analyzer: Option<Analyzer>,
    pub analysis_tx: mpsc::Sender<Analysis>,
    pub traces: Arc<TraceLog>,
    pub cancel: CancellationToken,
}

impl AgentLoop {
    pub async fn run(self) {
        let mut tick_id: u64 = 0;
        let mut failures: u32 = 0;
        let mut last_analysis = Instant::now();

        loop {
            // IDLE: wake on nudge, or periodically at max_interval.
            let max_interval = Duration::from_millis(self.handle.config().max_interval_ms);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.handle.nudged() => {}
                _ = tokio::time::sleep_until(last_analysis + max_interval) => {}
            }

            let cfg = self.handle.config();
            if !cfg.enabled || self.analyzer.is_none() {
                last_analysis = Instant::now();
                continue;
            }

            // WAITING: debounce; re-nudges extend the wait, bounded by
            // max_interval since the previous analysis.
            let force_by = last_analysis + Duration::from_millis(cfg.max_interval_ms);
            loop {
                let deadline =
                    (Instant::now() + Duration::from_millis(cfg.debounce_ms)).min(force_by);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.handle.nudged() => {
                        if Instant::now() >= force_by {
                            break;
                        }
                    }
                }
            }

            // Minimum gap between analyses.
            let next_allowed = last_analysis + Duration::from_millis(cfg.min_interval_ms);
            if Instant::now() < next_allowed {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(next_allowed) => {}
                }
            }

            // Back-off after consecutive failures.
            if failures > 0 {
                let shift = failures.min(6);
                let defer_ms =
                    cfg.debounce_ms.saturating_mul(1u64 << shift).min(cfg.max_interval_ms);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(defer_ms)) => {}
                }
            }

            // BUILDING
            let preset = preset_for(cfg.escalation_mode);
            let window =
                build_window(&self.feed, &self.sense, preset, DEFAULT_WINDOW_MS, epoch_ms());
            let situation = prompt::load_situation(cfg.situation_path.as_deref());
            let rendered = prompt::render(&situation, &window);

            // CALLING: hard budget; cancellation discards partial state.
            let Some(ref analyzer) = self.analyzer else {
                continue;
            };
            let started = Instant::now();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = tokio::time::timeout(ANALYSIS_TIMEOUT, analyzer.analyze(&cfg.model, &rendered)) => res,
            };
            last_analysis = Instant::now();

            let reply = match outcome {
                Err(_) => {
                    failures += 1;
                    tracing::warn!(failures, "analysis timed out, tick abandoned");
                    self.traces.record(
                        "agent.skip",
                        serde_json::json!({"reason": "timeout", "failures": failures}),
                    );
                    continue;
                }
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(failures, err = %e, "analysis failed");
                    self.traces.record(
                        "agent.skip",
                        serde_json::json!({"reason": "error", "failures": failures}),
                    );
                    continue;
                }
                Ok(Ok(text)) => {
                    failures = 0;
                    text
                }
            };

            // PARSING
            let envelope = parse::parse_envelope(&reply);

            // APPLIED: HUD to the overlay, entry to history + escalator.
            tick_id += 1;
            let enqueued =
                self.hub.broadcast(tick_id, envelope.hud.clone(), Priority::Normal, None);
            let entry = AgentEntry {
                id: tick_id,
                ts: epoch_ms(),
                digest: envelope.digest,
                hud: envelope.hud,
                pushed: enqueued > 0,
                task: envelope.task,
                record: envelope.record,
            };
            self.handle.push_entry(entry.clone());
            let deltas = self.sense.accumulated_deltas(true);
            self.traces.record(
                "agent.tick",
                serde_json::json!({
                    "id": entry.id,
                    "hud": entry.hud,
                    "durationMs": started.elapsed().as_millis() as u64,
                    "senseDeltas": deltas,
                }),
            );

            if self.analysis_tx.send(Analysis { entry, window }).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
