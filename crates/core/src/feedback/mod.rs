// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Feedback loop: every escalation is recorded to a daily append-only
//! store, then retroactively scored by deferred signal passes.

pub mod collector;
pub mod signals;
pub mod store;

use serde::{Deserialize, Serialize};

/// Outcome signals attached to a feedback record. All start unknown; the
/// collector fills them in at +60/+120/+300 s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_cleared: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_re_escalation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_app_switch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<f64>,
}

/// One escalation's feedback record. Appended as a JSONL line to the day
/// file keyed by the record's UTC date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub ts: u64,
    pub tick_id: u64,
    pub digest: String,
    pub hud: String,
    pub current_app: String,
    pub escalation_score: u32,
    pub escalation_reasons: Vec<String>,
    pub coding_context: bool,
    pub escalation_message: String,
    pub agent_response: String,
    pub response_latency_ms: u64,
    #[serde(default)]
    pub signals: FeedbackSignals,
    #[serde(default)]
    pub tags: Vec<String>,
}
