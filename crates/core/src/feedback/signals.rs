// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure outcome-signal computation. The collector gathers inputs from the
//! live buffers; everything here is deterministic over those inputs.

use crate::agent::score::has_error_pattern;

use super::{FeedbackRecord, FeedbackSignals};

/// Window after the record in which another overlapping escalation counts
/// as a re-escalation.
pub const RE_ESCALATION_WINDOW_MS: u64 = 300_000;

/// Window after the record in which an app switch counts as "quick".
pub const QUICK_SWITCH_WINDOW_MS: u64 = 10_000;

/// Inputs for one signal pass.
pub struct SignalContext<'a> {
    pub record: &'a FeedbackRecord,
    /// Milliseconds since the record was created.
    pub elapsed_ms: u64,
    /// Most recent agent digests, newest first (up to 3 considered).
    pub recent_digests: &'a [String],
    /// Records that might overlap the re-escalation window.
    pub later_records: &'a [FeedbackRecord],
    /// Timestamp of the first pushed agent entry after the record.
    pub first_pushed_ts: Option<u64>,
    /// App-transition timestamps at or after the record.
    pub app_transitions: &'a [u64],
}

/// Compute the full signal set for one pass. Signals stay `None` when the
/// data is insufficient to judge them.
pub fn compute(ctx: &SignalContext<'_>) -> FeedbackSignals {
    let record = ctx.record;

    let error_cleared = if !record.escalation_reasons.iter().any(|r| r.starts_with("error:")) {
        None
    } else if ctx.recent_digests.is_empty() {
        None
    } else {
        Some(ctx.recent_digests.iter().take(3).all(|d| !has_error_pattern(d)))
    };

    let no_re_escalation = if ctx.elapsed_ms < 60_000 {
        None
    } else {
        let overlapping = ctx.later_records.iter().any(|other| {
            other.id != record.id
                && other.ts > record.ts
                && other.ts <= record.ts + RE_ESCALATION_WINDOW_MS
                && reasons_intersect(&other.escalation_reasons, &record.escalation_reasons)
        });
        Some(!overlapping)
    };

    let dwell_time_ms = ctx.first_pushed_ts.map(|ts| ts.saturating_sub(record.ts));

    let quick_app_switch = Some(
        ctx.app_transitions
            .iter()
            .any(|&ts| ts > record.ts && ts <= record.ts + QUICK_SWITCH_WINDOW_MS),
    );

    let mut signals = FeedbackSignals {
        error_cleared,
        no_re_escalation,
        dwell_time_ms,
        quick_app_switch,
        composite: None,
    };
    signals.composite = composite(&signals);
    signals
}

/// Weighted composite in `[-1, 1]`: the sum of known branch values,
/// normalized by 2. `None` when no signal is known.
pub fn composite(signals: &FeedbackSignals) -> Option<f64> {
    let mut sum = 0.0f64;
    let mut known = false;

    if let Some(cleared) = signals.error_cleared {
        sum += if cleared { 0.5 } else { -0.3 };
        known = true;
    }
    if let Some(quiet) = signals.no_re_escalation {
        sum += if quiet { 0.3 } else { -0.2 };
        known = true;
    }
    if let Some(dwell) = signals.dwell_time_ms {
        sum += if dwell > 60_000 {
            0.15
        } else if dwell < 10_000 {
            -0.1
        } else {
            0.1
        };
        known = true;
    }
    if let Some(switched) = signals.quick_app_switch {
        sum += if switched { -0.15 } else { 0.05 };
        known = true;
    }

    if known {
        Some((sum / 2.0).clamp(-1.0, 1.0))
    } else {
        None
    }
}

fn reasons_intersect(a: &[String], b: &[String]) -> bool {
    a.iter().any(|reason| b.contains(reason))
}

#[cfg(test)]
#[path = "signals_tests.rs"]
mod tests;
