// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::buffers::feed::{Channel, FeedRing, Priority, Source};
use crate::buffers::sense::{SenseInput, SenseKind, SenseRing};
use crate::buffers::window::{build_window, Preset, DEFAULT_WINDOW_MS};
use crate::state::epoch_ms;

fn window_with(audio: &[&str], screens: &[(&str, &str)]) -> ContextWindow {
    let feed = FeedRing::new(100);
    let sense = SenseRing::new(30);
    let now = epoch_ms();
    for text in audio {
        feed.push(*text, Priority::Normal, Source::Audio, Channel::Stream);
    }
    for (n, (app, ocr)) in screens.iter().enumerate() {
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
    build_window(&feed, &sense, Preset::Standard, DEFAULT_WINDOW_MS, now)
}

#[test]
fn error_in_digest_scores_three() {
    let window = window_with(&[], &[]);
    let breakdown = score("build failed with exit status 1", &window);
    assert_eq!(breakdown.score, 3);
    assert_eq!(breakdown.reasons, ["error:failed"]);
}

#[test]
fn error_phrase_matches_substring() {
    let window = window_with(&[], &[]);
    let breakdown = score("TypeError: undefined is not a function", &window);
    // Word-boundary term wins over the phrase; one reason per category.
    assert_eq!(breakdown.score, 3);
    assert_eq!(breakdown.reasons.len(), 1);
    assert!(breakdown.reasons[0].starts_with("error:"));
}

#[test]
fn word_boundary_prevents_partial_match() {
    let window = window_with(&[], &[]);
    // "terror" and "panicking"? no: "panicking" contains "panic" with a
    // trailing word char, so the boundary rejects it.
    assert_eq!(score("terrorless mirror", &window).score, 0);
    assert_eq!(score("panicking is fine", &window).score, 0);
}

#[test]
fn question_in_audio_scores_two() {
    let window = window_with(&["so how do I fix this thing"], &[]);
    let breakdown = score("user reading docs", &window);
    assert_eq!(breakdown.score, 2);
    assert_eq!(breakdown.reasons, ["question:how do i"]);
}

#[test]
fn question_in_screen_ocr_scores_two() {
    let window = window_with(&[], &[("browser", "this test is not working at all")]);
    let breakdown = score("browsing", &window);
    assert_eq!(breakdown.score, 2);
}

#[test]
fn code_issue_scores_one() {
    let window = window_with(&[], &[]);
    let breakdown = score("leaving a TODO in the parser", &window);
    assert_eq!(breakdown.score, 1);
    assert_eq!(breakdown.reasons, ["codeIssue:todo"]);
}

#[test]
fn app_churn_scores_one() {
    let window = window_with(
        &[],
        &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")],
    );
    let breakdown = score("hopping around", &window);
    assert_eq!(breakdown.score, 1);
    assert_eq!(breakdown.reasons, ["appChurn:4apps"]);
}

#[test]
fn categories_stack_once_each() {
    let window = window_with(
        &["help me, this is not working"],
        &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")],
    );
    let breakdown =
        score("error: crash in FIXME block, another error: panic", &window);
    // 3 (error, once) + 2 (question, once) + 1 (code issue) + 1 (churn).
    assert_eq!(breakdown.score, 7);
    assert_eq!(breakdown.reasons.len(), 4);
}

#[test]
fn scorer_is_deterministic() {
    let window = window_with(&["why is it stuck"], &[("code", "TODO list")]);
    let a = score("exception in worker", &window);
    let b = score("exception in worker", &window);
    assert_eq!(a, b);
}
