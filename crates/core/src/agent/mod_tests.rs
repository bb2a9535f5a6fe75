// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn test_config() -> AgentConfig {
    AgentConfig {
        enabled: true,
        model: "test-model".to_owned(),
        debounce_ms: 100,
        min_interval_ms: 200,
        max_interval_ms: 1_000,
        situation_path: None,
        escalation_mode: EscalationMode::Selective,
        escalation_cooldown_ms: 30_000,
    }
}

fn entry(id: u64, ts: u64, digest: &str, pushed: bool) -> AgentEntry {
    AgentEntry {
        id,
        ts,
        digest: digest.to_owned(),
        hud: format!("hud {id}"),
        pushed,
        task: None,
        record: None,
    }
}

#[test]
fn history_is_bounded_and_newest_first() {
    let handle = AgentHandle::new(test_config());
    for n in 1..=(HISTORY_CAPACITY as u64 + 10) {
        handle.push_entry(entry(n, n, &format!("d{n}"), true));
    }
    assert_eq!(handle.history_len(), HISTORY_CAPACITY);

    let recent = handle.history(3);
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].id, HISTORY_CAPACITY as u64 + 10);
    assert!(recent[0].id > recent[1].id);
}

#[test]
fn latest_digest_and_recent_digests() {
    let handle = AgentHandle::new(test_config());
    assert_eq!(handle.latest_digest(), "");
    handle.push_entry(entry(1, 10, "first", true));
    handle.push_entry(entry(2, 20, "second", true));
    assert_eq!(handle.latest_digest(), "second");
    assert_eq!(handle.recent_digests(2), ["second", "first"]);
}

#[test]
fn first_pushed_after_skips_unpushed() {
    let handle = AgentHandle::new(test_config());
    handle.push_entry(entry(1, 100, "a", true));
    handle.push_entry(entry(2, 200, "b", false));
    handle.push_entry(entry(3, 300, "c", true));

    assert_eq!(handle.first_pushed_after(100), Some(300));
    assert_eq!(handle.first_pushed_after(300), None);
    assert_eq!(handle.first_pushed_after(0), Some(100));
}

#[test]
fn patch_applies_partial_updates() {
    let handle = AgentHandle::new(test_config());
    let updated = handle.apply_patch(AgentConfigPatch {
        escalation_mode: Some(EscalationMode::Focus),
        debounce_ms: Some(50),
        ..Default::default()
    });
    assert_eq!(updated.escalation_mode, EscalationMode::Focus);
    assert_eq!(updated.debounce_ms, 50);
    // Untouched fields survive.
    assert_eq!(updated.model, "test-model");
    assert!(updated.enabled);
}

#[test]
fn patch_enforces_cooldown_floor_and_interval_order() {
    let handle = AgentHandle::new(test_config());
    let updated = handle.apply_patch(AgentConfigPatch {
        escalation_cooldown_ms: Some(1),
        min_interval_ms: Some(60_000),
        ..Default::default()
    });
    assert_eq!(updated.escalation_cooldown_ms, 5_000);
    assert!(updated.max_interval_ms >= updated.min_interval_ms);
}

#[test]
fn preset_tracks_mode() {
    assert_eq!(preset_for(EscalationMode::Off), Preset::Lean);
    assert_eq!(preset_for(EscalationMode::Selective), Preset::Lean);
    assert_eq!(preset_for(EscalationMode::Focus), Preset::Standard);
    assert_eq!(preset_for(EscalationMode::Rich), Preset::Rich);
}

#[tokio::test]
async fn nudge_wakes_a_waiter() {
    let handle = AgentHandle::new(test_config());
    handle.nudge();
    // The stored permit satisfies the next waiter immediately.
    tokio::time::timeout(Duration::from_millis(50), handle.nudged())
        .await
        .unwrap_or_else(|_| panic!("nudge permit not delivered"));
}

#[test]
fn config_serializes_camel_case() {
    let json = serde_json::to_value(test_config()).unwrap_or_default();
    assert!(json.get("escalationMode").is_some());
    assert!(json.get("escalationCooldownMs").is_some());
    assert!(json.get("debounceMs").is_some());
    assert_eq!(json["escalationMode"], "selective");
}
