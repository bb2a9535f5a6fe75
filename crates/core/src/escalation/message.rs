// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Escalation message builder. Richness follows the mode: selective sends
//! a lean digest, focus adds app history, rich attaches images.

use std::fmt::Write as _;

use crate::buffers::window::ContextWindow;
use crate::config::EscalationMode;

/// Response length cap in coding contexts.
pub const CODING_RESPONSE_CAP: usize = 4_000;

/// Response length cap elsewhere.
pub const DEFAULT_RESPONSE_CAP: usize = 2_000;

/// Audio items quoted in the message.
const MAX_AUDIO_LINES: usize = 3;

/// OCR lines quoted in the message.
const MAX_OCR_LINES: usize = 6;

/// App names that mark a coding context.
const CODING_APPS: &[&str] = &[
    "code", "vscode", "cursor", "intellij", "idea", "pycharm", "webstorm", "xcode",
    "terminal", "iterm", "alacritty", "kitty", "wezterm", "vim", "nvim", "neovim",
    "emacs", "zed",
];

/// OCR/window-title fragments that mark a coding context.
const CODING_MARKERS: &[&str] =
    &["diff --git", "traceback", "cargo ", "npm err", "fn main", "pub fn ", "def "];

/// Whether the window looks like an IDE/terminal session. Drives the
/// response length cap.
pub fn coding_context(window: &ContextWindow) -> bool {
    let app = window.current_app.to_lowercase();
    if CODING_APPS.iter().any(|known| app.contains(known)) {
        return true;
    }
    window.screen.iter().any(|event| {
        let title = event.window_title.as_deref().unwrap_or("").to_lowercase();
        let ocr = event.ocr.as_deref().unwrap_or("").to_lowercase();
        CODING_MARKERS.iter().any(|m| title.contains(m) || ocr.contains(m))
    })
}

/// Build the escalation message for a digest at the given mode.
pub fn build_message(digest: &str, window: &ContextWindow, mode: EscalationMode) -> String {
    let mut out = String::with_capacity(1_024);
    let _ = writeln!(out, "[sinain] {digest}");
    let _ = writeln!(out, "App: {}", window.current_app);

    if !window.audio.is_empty() {
        out.push_str("Audio:\n");
        let skip = window.audio.len().saturating_sub(MAX_AUDIO_LINES);
        for item in window.audio.iter().skip(skip) {
            let _ = writeln!(out, "- {}", item.text);
        }
    }

    let ocr_lines: Vec<String> = window
        .screen
        .iter()
        .filter_map(|e| e.ocr.as_deref())
        .flat_map(|ocr| ocr.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(MAX_OCR_LINES)
        .map(str::to_owned)
        .collect();
    if !ocr_lines.is_empty() {
        out.push_str("Screen:\n");
        for line in &ocr_lines {
            let _ = writeln!(out, "- {line}");
        }
    }

    if matches!(mode, EscalationMode::Focus | EscalationMode::Rich)
        && window.app_history.len() > 1
    {
        out.push_str("App history:\n");
        for entry in &window.app_history {
            let _ = writeln!(out, "- {} {}", entry.ts, entry.app);
        }
    }

    if mode == EscalationMode::Rich && !window.images.is_empty() {
        out.push_str("Attachments:\n");
        for image in &window.images {
            let _ = writeln!(out, "- data:image/png;base64,{}", image.data);
        }
    }

    out
}

/// Cap a response to the context-appropriate length, on a char boundary.
pub fn cap_response(text: &str, coding: bool) -> String {
    let cap = if coding { CODING_RESPONSE_CAP } else { DEFAULT_RESPONSE_CAP };
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => text[..byte_idx].to_owned(),
        None => text.to_owned(),
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
