// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::buffers::feed::{Channel, FeedRing, Priority, Source};
use crate::buffers::sense::{SenseInput, SenseKind, SenseRing};
use crate::buffers::window::{build_window, Preset, DEFAULT_WINDOW_MS};
use crate::state::epoch_ms;

fn window(apps: &[(&str, &str)], audio: &[&str], with_image: bool) -> ContextWindow {
    let feed = FeedRing::new(100);
    let sense = SenseRing::new(30);
    let now = epoch_ms();
    for text in audio {
        feed.push(*text, Priority::Normal, Source::Audio, Channel::Stream);
    }
    for (n, (app, ocr)) in apps.iter().enumerate() {
        sense.admit(SenseInput {
            ts: now - 100 + n as u64,
            kind: SenseKind::Text,
            app: (*app).to_owned(),
            window_title: None,
            screen_id: 0,
            ssim: 0.5,
            ocr: Some((*ocr).to_owned()),
            image: None,
            bbox: None,
        });
    }
    if with_image {
        sense.admit(SenseInput {
            ts: now - 1,
            kind: SenseKind::Image,
            app: "code".to_owned(),
            window_title: None,
            screen_id: 0,
            ssim: 0.2,
            ocr: None,
            image: Some(vec![9, 9, 9]),
            bbox: None,
        });
    }
    build_window(&feed, &sense, Preset::Rich, DEFAULT_WINDOW_MS, now)
}

#[test]
fn lean_message_has_digest_app_audio_screen() {
    let window = window(&[("browser", "some page")], &["can you check this"], false);
    let message = build_message("reading docs", &window, EscalationMode::Selective);
    assert!(message.starts_with("[sinain] reading docs\n"));
    assert!(message.contains("App: browser"));
    assert!(message.contains("- can you check this"));
    assert!(message.contains("- some page"));
    assert!(!message.contains("App history:"));
    assert!(!message.contains("Attachments:"));
}

#[test]
fn focus_adds_app_history() {
    let window = window(&[("a", "1"), ("b", "2")], &[], false);
    let message = build_message("hopping", &window, EscalationMode::Focus);
    assert!(message.contains("App history:"));
}

#[test]
fn rich_adds_attachments() {
    let window = window(&[("code", "fn main() {}")], &[], true);
    let message = build_message("coding", &window, EscalationMode::Rich);
    assert!(message.contains("Attachments:"));
    assert!(message.contains("data:image/png;base64,"));
}

#[test]
fn ocr_lines_are_capped() {
    let big = (0..40).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
    let window = window(&[("term", big.as_str())], &[], false);
    let message = build_message("busy", &window, EscalationMode::Selective);
    let quoted = message.lines().filter(|l| l.starts_with("- line")).count();
    assert_eq!(quoted, 6);
}

#[test]
fn coding_context_by_app_name() {
    assert!(coding_context(&window(&[("Visual Studio Code", "hello")], &[], false)));
    assert!(coding_context(&window(&[("iTerm2", "ls -la")], &[], false)));
    assert!(!coding_context(&window(&[("spotify", "now playing")], &[], false)));
}

#[test]
fn coding_context_by_ocr_marker() {
    assert!(coding_context(&window(&[("browser", "diff --git a/x b/x")], &[], false)));
}

#[test]
fn response_caps_differ_by_context() {
    let long = "x".repeat(10_000);
    assert_eq!(cap_response(&long, true).chars().count(), CODING_RESPONSE_CAP);
    assert_eq!(cap_response(&long, false).chars().count(), DEFAULT_RESPONSE_CAP);
    assert_eq!(cap_response("short", false), "short");
}
