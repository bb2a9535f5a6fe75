// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deferred signal collector: each recorded escalation gets three passes
//! (+60 s, +120 s, +300 s) that read the live agent history and sense ring
//! and persist the computed signals. The 300 s pass is final and clears
//! the record from the pending map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::AgentHandle;
use crate::buffers::sense::SenseRing;

use super::signals::{self, SignalContext, RE_ESCALATION_WINDOW_MS};
use super::store::{utc_date, FeedbackStore};
use super::FeedbackRecord;

/// Pass offsets in seconds; the last is final.
const PASS_OFFSETS_S: [u64; 3] = [60, 120, 300];

/// Schedules and runs deferred signal passes.
pub struct SignalCollector {
    store: Arc<FeedbackStore>,
    agent: AgentHandle,
    sense: Arc<SenseRing>,
    pending: Mutex<HashMap<String, FeedbackRecord>>,
    cancel: CancellationToken,
}

impl SignalCollector {
    pub fn new(
        store: Arc<FeedbackStore>,
        agent: AgentHandle,
        sense: Arc<SenseRing>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self { store, agent, sense, pending: Mutex::new(HashMap::new()), cancel })
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, FeedbackRecord>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Arm the three deferred passes for a freshly appended record.
    pub fn schedule(self: &Arc<Self>, record: FeedbackRecord) {
        let id = record.id.clone();
        self.lock_pending().insert(id.clone(), record);

        let last = PASS_OFFSETS_S[PASS_OFFSETS_S.len() - 1];
        for offset_s in PASS_OFFSETS_S {
            let collector = Arc::clone(self);
            let id = id.clone();
            let final_pass = offset_s == last;
            tokio::spawn(async move {
                tokio::select! {
                    _ = collector.cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(offset_s)) => {}
                }
                collector.run_pass(&id, offset_s * 1_000, final_pass);
            });
        }
    }

    /// One signal pass over a pending record.
    fn run_pass(&self, id: &str, elapsed_ms: u64, final_pass: bool) {
        let Some(record) = self.lock_pending().get(id).cloned() else {
            return;
        };

        let signals = self.compute(&record, elapsed_ms);
        let date = utc_date(record.ts);
        match self.store.update_signals(&record.id, &date, signals) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(record_id = %record.id, %date, "signal target record missing");
            }
            Err(e) => {
                tracing::warn!(record_id = %record.id, err = %e, "signal persistence failed");
            }
        }

        if final_pass {
            self.lock_pending().remove(id);
        }
    }

    fn compute(&self, record: &FeedbackRecord, elapsed_ms: u64) -> super::FeedbackSignals {
        let recent_digests = self.agent.recent_digests(3);

        // Later records can land in the record's day or, near midnight, the
        // following one.
        let date = utc_date(record.ts);
        let mut later_records = self.store.query_day(&date);
        let next_date = utc_date(record.ts + RE_ESCALATION_WINDOW_MS);
        if next_date != date {
            later_records.extend(self.store.query_day(&next_date));
        }

        let app_transitions: Vec<u64> =
            self.sense.app_history(record.ts).iter().map(|e| e.ts).collect();
        let first_pushed_ts = self.agent.first_pushed_after(record.ts);

        signals::compute(&SignalContext {
            record,
            elapsed_ms,
            recent_digests: &recent_digests,
            later_records: &later_records,
            first_pushed_ts,
            app_transitions: &app_transitions,
        })
    }

    /// Number of records still awaiting their final pass.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }
}

#[cfg(test)]
#[path = "collector_tests.rs"]
mod tests;
