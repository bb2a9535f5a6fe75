// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic analysis prompt: the operator's situation file followed by
//! a digest-style rendering of the context window.

use std::fmt::Write as _;
use std::path::Path;

use crate::buffers::window::ContextWindow;

/// Default instructions when no situation file is configured.
const DEFAULT_SITUATION: &str = "You are an ambient assistant watching a user's \
screen and audio. Summarize what they are doing and surface one short, useful \
HUD line. Stay terse.";

const ENVELOPE_INSTRUCTIONS: &str = r#"Respond with a single JSON object:
{"digest": "<one-line summary of current activity>",
 "hud": "<short line for the head-up display, or \"Idle\">",
 "task": "<optional background task worth delegating>",
 "record": {"tags": ["<optional feedback tags>"], "note": "<optional note>"}}"#;

/// Read the situation file, falling back to the built-in default. Missing
/// or unreadable files are not an error; the loop must keep ticking.
pub fn load_situation(path: Option<&Path>) -> String {
    match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) if !contents.trim().is_empty() => contents,
            Ok(_) => DEFAULT_SITUATION.to_owned(),
            Err(e) => {
                tracing::debug!(path = %p.display(), err = %e, "situation file unreadable");
                DEFAULT_SITUATION.to_owned()
            }
        },
        None => DEFAULT_SITUATION.to_owned(),
    }
}

/// Render the full analysis prompt for one tick.
pub fn render(situation: &str, window: &ContextWindow) -> String {
    let mut out = String::with_capacity(2_048);
    out.push_str(situation.trim_end());
    out.push_str("\n\n## Current context\n");
    let _ = writeln!(out, "Active app: {}", window.current_app);
    let _ = writeln!(
        out,
        "Window: last {}s, {} screen events, {} audio lines",
        window.window_ms / 1_000,
        window.screen.len(),
        window.audio.len()
    );

    if !window.screen.is_empty() {
        out.push_str("\n### Screen (newest first)\n");
        for event in &window.screen {
            match event.ocr {
                Some(ref ocr) => {
                    let _ = writeln!(out, "- [{}] {}", event.app, single_line(ocr));
                }
                None => {
                    let _ = writeln!(out, "- [{}] (no text)", event.app);
                }
            }
        }
    }

    if !window.audio.is_empty() {
        out.push_str("\n### Audio transcript (oldest first)\n");
        for item in &window.audio {
            let _ = writeln!(out, "- {}", single_line(&item.text));
        }
    }

    if window.app_history.len() > 1 {
        out.push_str("\n### App history\n");
        for entry in &window.app_history {
            let _ = writeln!(out, "- {} {}", entry.ts, entry.app);
        }
    }

    out.push_str("\n## Instructions\n");
    out.push_str(ENVELOPE_INSTRUCTIONS);
    out
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
