// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::agent::{AgentConfig, AgentEntry};
use crate::buffers::sense::{SenseInput, SenseKind};
use crate::config::EscalationMode;
use crate::feedback::FeedbackSignals;
use crate::state::epoch_ms;

fn agent_handle() -> AgentHandle {
    AgentHandle::new(AgentConfig {
        enabled: true,
        model: "m".to_owned(),
        debounce_ms: 100,
        min_interval_ms: 100,
        max_interval_ms: 1_000,
        situation_path: None,
        escalation_mode: EscalationMode::Selective,
        escalation_cooldown_ms: 30_000,
    })
}

fn entry(id: u64, ts: u64, digest: &str) -> AgentEntry {
    AgentEntry {
        id,
        ts,
        digest: digest.to_owned(),
        hud: "hud".to_owned(),
        pushed: true,
        task: None,
        record: None,
    }
}

fn record(id: &str, ts: u64, reasons: &[&str]) -> FeedbackRecord {
    FeedbackRecord {
        id: id.to_owned(),
        ts,
        tick_id: 7,
        digest: "digest".to_owned(),
        hud: "hud".to_owned(),
        current_app: "code".to_owned(),
        escalation_score: 4,
        escalation_reasons: reasons.iter().map(|r| (*r).to_owned()).collect(),
        coding_context: true,
        escalation_message: String::new(),
        agent_response: String::new(),
        response_latency_ms: 100,
        signals: FeedbackSignals::default(),
        tags: Vec::new(),
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    store: Arc<FeedbackStore>,
    sense: Arc<SenseRing>,
    agent: AgentHandle,
    collector: Arc<SignalCollector>,
}

fn fixture() -> Fixture {
    let tmp = match tempfile::tempdir() {
        Ok(tmp) => tmp,
        Err(e) => panic!("tempdir: {e}"),
    };
    let store = match FeedbackStore::open(tmp.path().join("feedback"), 30) {
        Ok(store) => Arc::new(store),
        Err(e) => panic!("open: {e}"),
    };
    let sense = Arc::new(SenseRing::new(30));
    let agent = agent_handle();
    let collector = SignalCollector::new(
        Arc::clone(&store),
        agent.clone(),
        Arc::clone(&sense),
        CancellationToken::new(),
    );
    Fixture { _tmp: tmp, store, sense, agent, collector }
}

#[tokio::test]
async fn passes_persist_signals_and_final_clears_pending() {
    let fx = fixture();
    let now = epoch_ms();
    let rec = record("r1", now.saturating_sub(70_000), &["error:crash"]);
    let _ = fx.store.append(&rec);

    fx.agent.push_entry(entry(1, rec.ts + 12_000, "all quiet now"));
    fx.collector.lock_pending().insert(rec.id.clone(), rec.clone());

    fx.collector.run_pass("r1", 60_000, false);
    assert_eq!(fx.collector.pending_len(), 1);

    let date = utc_date(rec.ts);
    let stored = fx.store.query_day(&date);
    assert_eq!(stored[0].signals.error_cleared, Some(true));
    assert_eq!(stored[0].signals.dwell_time_ms, Some(12_000));
    assert!(stored[0].signals.composite.is_some());

    fx.collector.run_pass("r1", 300_000, true);
    assert_eq!(fx.collector.pending_len(), 0);
}

#[tokio::test]
async fn re_escalation_detected_from_store() {
    let fx = fixture();
    let now = epoch_ms();
    let rec = record("r1", now.saturating_sub(200_000), &["error:crash"]);
    let other = record("r2", rec.ts + 120_000, &["error:crash"]);
    let _ = fx.store.append(&rec);
    let _ = fx.store.append(&other);

    fx.collector.lock_pending().insert(rec.id.clone(), rec.clone());
    fx.collector.run_pass("r1", 120_000, false);

    let stored = fx.store.query_day(&utc_date(rec.ts));
    let target = stored.iter().find(|r| r.id == "r1");
    assert_eq!(target.and_then(|r| r.signals.no_re_escalation), Some(false));
}

#[tokio::test]
async fn quick_app_switch_read_from_sense_ring() {
    let fx = fixture();
    let now = epoch_ms();
    let rec = record("r1", now.saturating_sub(30_000), &["error:crash"]);
    let _ = fx.store.append(&rec);

    // Transition 5 s after the record.
    fx.sense.admit(SenseInput {
        ts: rec.ts + 5_000,
        kind: SenseKind::Text,
        app: "slack".to_owned(),
        window_title: None,
        screen_id: 0,
        ssim: 0.5,
        ocr: Some("ping".to_owned()),
        image: None,
        bbox: None,
    });

    fx.collector.lock_pending().insert(rec.id.clone(), rec.clone());
    fx.collector.run_pass("r1", 60_000, false);

    let stored = fx.store.query_day(&utc_date(rec.ts));
    assert_eq!(stored[0].signals.quick_app_switch, Some(true));
}

#[tokio::test]
async fn pass_on_unknown_record_is_a_no_op() {
    let fx = fixture();
    fx.collector.run_pass("ghost", 60_000, true);
    assert_eq!(fx.collector.pending_len(), 0);
}
