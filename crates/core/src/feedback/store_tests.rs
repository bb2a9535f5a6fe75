// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::state::epoch_ms;

fn record(id: &str, ts: u64) -> FeedbackRecord {
    FeedbackRecord {
        id: id.to_owned(),
        ts,
        tick_id: 1,
        digest: "digest".to_owned(),
        hud: "hud".to_owned(),
        current_app: "code".to_owned(),
        escalation_score: 4,
        escalation_reasons: vec!["error:crash".to_owned()],
        coding_context: true,
        escalation_message: "[sinain] digest".to_owned(),
        agent_response: "try x".to_owned(),
        response_latency_ms: 120,
        signals: FeedbackSignals::default(),
        tags: Vec::new(),
    }
}

fn store() -> (tempfile::TempDir, FeedbackStore) {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("tempdir: {e}"),
    };
    let store = match FeedbackStore::open(dir.path().join("feedback"), 30) {
        Ok(store) => store,
        Err(e) => panic!("open: {e}"),
    };
    (dir, store)
}

#[test]
fn append_writes_one_line_per_record() {
    let (_tmp, store) = store();
    let now = epoch_ms();
    for n in 0..3u64 {
        if let Err(e) = store.append(&record(&format!("r{n}"), now + n)) {
            panic!("append: {e}");
        }
    }
    let date = utc_date(now);
    let records = store.query_day(&date);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, "r0");
    assert_eq!(store.open_day().as_deref(), Some(date.as_str()));
}

#[test]
fn update_signals_rewrites_single_record() {
    let (_tmp, store) = store();
    let now = epoch_ms();
    let date = utc_date(now);
    for n in 0..3u64 {
        let _ = store.append(&record(&format!("r{n}"), now + n));
    }

    let signals = FeedbackSignals {
        error_cleared: Some(true),
        dwell_time_ms: Some(12_000),
        ..Default::default()
    };
    match store.update_signals("r1", &date, signals) {
        Ok(found) => assert!(found),
        Err(e) => panic!("update: {e}"),
    }

    let records = store.query_day(&date);
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].signals.error_cleared, Some(true));
    assert_eq!(records[1].signals.dwell_time_ms, Some(12_000));
    assert_eq!(records[0].signals, FeedbackSignals::default());

    // Appends after the rewrite still land in the same file.
    let _ = store.append(&record("r3", now + 10));
    assert_eq!(store.query_day(&date).len(), 4);
}

#[test]
fn update_signals_missing_record_or_day() {
    let (_tmp, store) = store();
    let now = epoch_ms();
    let date = utc_date(now);
    let _ = store.append(&record("r0", now));

    match store.update_signals("nope", &date, FeedbackSignals::default()) {
        Ok(found) => assert!(!found),
        Err(e) => panic!("update: {e}"),
    }
    match store.update_signals("r0", "1999-01-01", FeedbackSignals::default()) {
        Ok(found) => assert!(!found),
        Err(e) => panic!("update: {e}"),
    }
}

#[test]
fn query_recent_is_newest_first_and_limited() {
    let (_tmp, store) = store();
    let now = epoch_ms();
    for n in 0..5u64 {
        let _ = store.append(&record(&format!("r{n}"), now + n));
    }
    let recent = store.query_recent(3);
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].id, "r4");
    assert_eq!(recent[2].id, "r2");
}

#[test]
fn prune_removes_stale_days_only() {
    let (_tmp, store) = store();
    let now = epoch_ms();
    let _ = store.append(&record("fresh", now));

    // Fabricate an ancient day file directly.
    let old_path = store.day_path("2001-01-01");
    if let Err(e) = std::fs::write(&old_path, "{}\n") {
        panic!("write: {e}");
    }
    // And a non-day file that must survive.
    let stray = old_path.with_file_name("notes.txt");
    let _ = std::fs::write(&stray, "keep me");

    let removed = match store.prune() {
        Ok(removed) => removed,
        Err(e) => panic!("prune: {e}"),
    };
    assert_eq!(removed, 1);
    assert!(!old_path.exists());
    assert!(stray.exists());
    assert_eq!(store.today_records().len(), 1);
}

#[test]
fn utc_date_formats_iso() {
    // 2026-08-01T00:00:00Z
    assert_eq!(utc_date(1_785_542_400_000), "2026-08-01");
    assert_eq!(utc_date(0), "1970-01-01");
}
