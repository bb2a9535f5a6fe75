// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Escalation pipeline: gate (score, cooldown, dedup), message building,
//! circuit-broken RPC delivery with HTTP fallback, spawn-task bookkeeping,
//! and the feedback record for every delivered escalation.
//!
//! The ledger and stats live inside the escalator's own task; nothing else
//! mutates them. The ledger is marked before the RPC fires so a crash
//! mid-delivery cannot double-escalate.

pub mod breaker;
pub mod hook;
pub mod message;
pub mod rpc;
pub mod spawn;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::score;
use crate::agent::{AgentHandle, Analysis};
use crate::buffers::feed::{Channel, FeedRing, Priority, Source};
use crate::buffers::window::ContextWindow;
use crate::config::EscalationMode;
use crate::escalation::breaker::CircuitBreaker;
use crate::escalation::hook::HookClient;
use crate::escalation::rpc::{extract_payload_texts, AgentRpc, RPC_BUDGET};
use crate::escalation::spawn::{
    dispatch_message, extract_spawn_ack, normalize_task, spawn_poller, PendingSpawn,
    SpawnTracker,
};
use crate::feedback::collector::SignalCollector;
use crate::feedback::store::FeedbackStore;
use crate::feedback::{FeedbackRecord, FeedbackSignals};
use crate::overlay::hub::{OverlayHub, StatusPatch};
use crate::state::epoch_ms;
use crate::trace::TraceLog;

/// Score at or above which a selective-mode digest escalates.
pub const ESCALATION_THRESHOLD: u32 = 3;

/// Glyph prefixing agent replies in the feed.
const REPLY_PREFIX: &str = "[\u{1F916}] ";

/// HUD lines that never escalate.
const IDLE_HUDS: &[&str] = &["Idle", "\u{2014}"];

/// Escalation ledger, mutated before each RPC fires.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub last_escalation_ts: u64,
    pub last_escalated_digest: String,
}

/// Counters surfaced via `/health`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationStats {
    pub escalations: u64,
    pub no_reply: u64,
    pub errors: u64,
    pub gate_rejects: u64,
    pub breaker_opens: u64,
}

/// Why the gate said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ModeOff,
    Cooldown,
    IdleHud,
    DuplicateDigest,
    BelowThreshold,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModeOff => "mode_off",
            Self::Cooldown => "cooldown",
            Self::IdleHud => "idle_hud",
            Self::DuplicateDigest => "duplicate_digest",
            Self::BelowThreshold => "below_threshold",
        }
    }
}

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Escalate,
    Reject(RejectReason),
}

/// The escalation gate, checked in order: mode, cooldown, idle HUD,
/// always-escalate modes, selective dedup, score threshold.
pub fn gate(
    mode: EscalationMode,
    now_ms: u64,
    ledger: &Ledger,
    cooldown_ms: u64,
    hud: &str,
    digest: &str,
    score: u32,
) -> GateDecision {
    if mode == EscalationMode::Off {
        return GateDecision::Reject(RejectReason::ModeOff);
    }
    if now_ms.saturating_sub(ledger.last_escalation_ts) < cooldown_ms {
        return GateDecision::Reject(RejectReason::Cooldown);
    }
    if IDLE_HUDS.contains(&hud) {
        return GateDecision::Reject(RejectReason::IdleHud);
    }
    if matches!(mode, EscalationMode::Focus | EscalationMode::Rich) {
        return GateDecision::Escalate;
    }
    if digest == ledger.last_escalated_digest {
        return GateDecision::Reject(RejectReason::DuplicateDigest);
    }
    if score >= ESCALATION_THRESHOLD {
        GateDecision::Escalate
    } else {
        GateDecision::Reject(RejectReason::BelowThreshold)
    }
}

/// A delivered escalation, ready to become a feedback record.
struct Delivered<'a> {
    ts: u64,
    entry: &'a crate::agent::AgentEntry,
    window: &'a ContextWindow,
    breakdown: &'a score::ScoreBreakdown,
    coding_context: bool,
    escalation_message: String,
    agent_response: String,
    response_latency_ms: u64,
}

/// The escalator task.
pub struct Escalator {
    pub agent: AgentHandle,
    pub feed: Arc<FeedRing>,
    pub hub: Arc<OverlayHub>,
    pub traces: Arc<TraceLog>,
    pub rpc: Option<AgentRpc>,
    pub hook: Option<HookClient>,
    pub stats: Arc<Mutex<EscalationStats>>,
    pub store: Arc<FeedbackStore>,
    pub collector: Arc<SignalCollector>,
    pub tracker: Arc<Mutex<SpawnTracker>>,
    pub session_key: String,
    pub analysis_rx: mpsc::Receiver<Analysis>,
    pub cancel: CancellationToken,
}

impl Escalator {
    pub async fn run(mut self) {
        self.recover_pending_spawns();

        let mut ledger = Ledger::default();
        let mut breaker = CircuitBreaker::new();

        loop {
            let analysis = tokio::select! {
                _ = self.cancel.cancelled() => break,
                analysis = self.analysis_rx.recv() => analysis,
            };
            match analysis {
                Some(analysis) => {
                    self.handle_analysis(analysis, &mut ledger, &mut breaker).await;
                }
                None => break,
            }
        }
    }

    /// Re-arm completion pollers for tasks that survived a restart.
    fn recover_pending_spawns(&self) {
        let Some(ref rpc) = self.rpc else {
            return;
        };
        let pending = self.lock_tracker().pending();
        for spawn in pending {
            tracing::info!(run_id = %spawn.run_id, "recovering pending spawn task");
            spawn_poller(
                rpc.clone(),
                Arc::clone(&self.tracker),
                spawn,
                Arc::clone(&self.feed),
                Arc::clone(&self.hub),
                Arc::clone(&self.traces),
                self.cancel.child_token(),
            );
        }
    }

    async fn handle_analysis(
        &self,
        analysis: Analysis,
        ledger: &mut Ledger,
        breaker: &mut CircuitBreaker,
    ) {
        let Analysis { entry, window } = analysis;

        if let Some(ref task) = entry.task {
            self.dispatch_spawn_task(task, None).await;
        }

        let cfg = self.agent.config();
        let breakdown = score::score(&entry.digest, &window);
        let now = epoch_ms();
        let decision = gate(
            cfg.escalation_mode,
            now,
            ledger,
            cfg.escalation_cooldown_ms,
            &entry.hud,
            &entry.digest,
            breakdown.score,
        );

        let GateDecision::Escalate = decision else {
            if let GateDecision::Reject(reason) = decision {
                self.bump(|stats| stats.gate_rejects += 1);
                self.traces.record(
                    "escalation.reject",
                    serde_json::json!({
                        "tick": entry.id,
                        "reason": reason.as_str(),
                        "score": breakdown.score,
                    }),
                );
            }
            return;
        };

        // Mark the ledger before the RPC fires.
        ledger.last_escalation_ts = now;
        ledger.last_escalated_digest = entry.digest.clone();
        self.bump(|stats| stats.escalations += 1);

        let escalation_message =
            message::build_message(&entry.digest, &window, cfg.escalation_mode);
        let idem_key = format!("hud-{}-{}", entry.id, now);
        let coding = message::coding_context(&window);

        if !breaker.allow(now) {
            self.push_error("escalation skipped: agent circuit open");
            self.traces.record(
                "escalation.breaker",
                serde_json::json!({"tick": entry.id, "idemKey": idem_key}),
            );
            return;
        }

        let started = Instant::now();
        let outcome = self.deliver(&escalation_message, &idem_key).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                breaker.record_success();
                self.hub.update_state(StatusPatch {
                    connection: Some("ok".to_owned()),
                    ..Default::default()
                });

                let response = if output.is_empty() {
                    self.bump(|stats| stats.no_reply += 1);
                    if matches!(cfg.escalation_mode, EscalationMode::Focus | EscalationMode::Rich)
                    {
                        self.push_reply(&entry.digest, coding)
                    } else {
                        String::new()
                    }
                } else {
                    self.push_reply(&output, coding)
                };

                self.record_feedback(Delivered {
                    ts: now,
                    entry: &entry,
                    window: &window,
                    breakdown: &breakdown,
                    coding_context: coding,
                    escalation_message,
                    agent_response: response,
                    response_latency_ms: latency_ms,
                });
                self.traces.record(
                    "escalation.sent",
                    serde_json::json!({
                        "tick": entry.id,
                        "idemKey": idem_key,
                        "score": breakdown.score,
                        "latencyMs": latency_ms,
                    }),
                );
            }
            Err(e) => {
                self.bump(|stats| stats.errors += 1);
                self.push_error(&format!("escalation failed: {e}"));
                self.hub.update_state(StatusPatch {
                    connection: Some("error".to_owned()),
                    ..Default::default()
                });
                if breaker.record_failure(now) {
                    self.bump(|stats| stats.breaker_opens += 1);
                    self.traces.record(
                        "escalation.breaker_open",
                        serde_json::json!({"tick": entry.id}),
                    );
                }

                if let Some(ref hook) = self.hook {
                    match hook.notify(&escalation_message, &self.session_key).await {
                        Ok(()) => {
                            breaker.record_success();
                            self.traces.record(
                                "escalation.fallback",
                                serde_json::json!({"tick": entry.id}),
                            );
                        }
                        Err(e2) => {
                            tracing::warn!(err = %e2, "escalation fallback failed");
                            if breaker.record_failure(epoch_ms()) {
                                self.bump(|stats| stats.breaker_opens += 1);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Primary delivery: `agent.call` over the persistent WS. Returns the
    /// concatenated reply text; empty means `NO_REPLY`.
    async fn deliver(&self, message: &str, idem_key: &str) -> anyhow::Result<String> {
        let Some(ref rpc) = self.rpc else {
            anyhow::bail!("agent rpc not configured");
        };
        let reply = rpc
            .call(
                "agent.call",
                serde_json::json!({
                    "message": message,
                    "idem_key": idem_key,
                    "session_key": self.session_key,
                }),
                RPC_BUDGET,
            )
            .await?;
        if !reply.ok {
            anyhow::bail!("agent rpc error: {}", reply.error.unwrap_or_default());
        }
        Ok(reply.payload.as_ref().map(extract_payload_texts).unwrap_or_default())
    }

    /// Dispatch a task directive to the agent and start polling it.
    pub async fn dispatch_spawn_task(&self, task: &str, label: Option<&str>) {
        let normalized = normalize_task(task);
        let now = epoch_ms();
        if self.lock_tracker().check_and_note_dispatch(&normalized, now) {
            tracing::debug!(task = %normalized, "spawn task deduplicated");
            return;
        }
        let Some(ref rpc) = self.rpc else {
            tracing::debug!("spawn task dropped: agent rpc not configured");
            return;
        };

        let label = label.unwrap_or("task");
        let message = dispatch_message(task, label);
        let reply = rpc
            .call(
                "agent.call",
                serde_json::json!({
                    "message": message,
                    "idem_key": format!("spawn-{now}"),
                    "session_key": self.session_key,
                }),
                RPC_BUDGET,
            )
            .await;

        let output = match reply {
            Ok(reply) if reply.ok => {
                reply.payload.as_ref().map(extract_payload_texts).unwrap_or_default()
            }
            Ok(reply) => {
                tracing::warn!(error = ?reply.error, "spawn dispatch rejected");
                return;
            }
            Err(e) => {
                tracing::warn!(err = %e, "spawn dispatch failed");
                return;
            }
        };

        let Some((run_id, child_session_key)) = extract_spawn_ack(&output) else {
            tracing::debug!("spawn dispatch reply carried no run ack");
            return;
        };

        let pending = PendingSpawn {
            run_id: run_id.clone(),
            child_session_key,
            label: Some(label.to_owned()),
            started_at: now,
            polling_emitted: false,
        };
        self.lock_tracker().insert(pending.clone());
        self.traces.record(
            "spawn.dispatched",
            serde_json::json!({"runId": run_id, "label": label}),
        );
        spawn_poller(
            rpc.clone(),
            Arc::clone(&self.tracker),
            pending,
            Arc::clone(&self.feed),
            Arc::clone(&self.hub),
            Arc::clone(&self.traces),
            self.cancel.child_token(),
        );
    }

    /// Push an agent reply into the feed and overlay. Returns the capped
    /// response text.
    fn push_reply(&self, text: &str, coding: bool) -> String {
        let capped = message::cap_response(text, coding);
        let item = self.feed.push(
            format!("{REPLY_PREFIX}{capped}"),
            Priority::High,
            Source::Openclaw,
            Channel::Agent,
        );
        self.hub.broadcast_item(&item);
        capped
    }

    /// Low-priority "err"-prefixed overlay item; the only user-visible
    /// error surface.
    fn push_error(&self, text: &str) {
        let item = self.feed.push(
            format!("err: {text}"),
            Priority::Normal,
            Source::System,
            Channel::Stream,
        );
        self.hub.broadcast_item(&item);
    }

    fn record_feedback(&self, delivered: Delivered<'_>) {
        let entry = delivered.entry;
        let tags = entry.record.as_ref().map(|r| r.tags.clone()).unwrap_or_default();
        let record = FeedbackRecord {
            id: uuid::Uuid::new_v4().to_string(),
            ts: delivered.ts,
            tick_id: entry.id,
            digest: entry.digest.clone(),
            hud: entry.hud.clone(),
            current_app: delivered.window.current_app.clone(),
            escalation_score: delivered.breakdown.score,
            escalation_reasons: delivered.breakdown.reasons.clone(),
            coding_context: delivered.coding_context,
            escalation_message: delivered.escalation_message,
            agent_response: delivered.agent_response,
            response_latency_ms: delivered.response_latency_ms,
            signals: FeedbackSignals::default(),
            tags,
        };
        if let Err(e) = self.store.append(&record) {
            tracing::warn!(err = %e, "feedback append failed");
            return;
        }
        self.collector.schedule(record);
    }

    fn bump(&self, apply: impl FnOnce(&mut EscalationStats)) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut stats);
    }

    fn lock_tracker(&self) -> std::sync::MutexGuard<'_, SpawnTracker> {
        match self.tracker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
