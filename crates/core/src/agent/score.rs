// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Escalation scorer: pure, deterministic, additive. Each signal category
//! contributes at most once.

use std::sync::LazyLock;

use regex::Regex;

use crate::buffers::window::ContextWindow;

/// Word-boundary error terms.
static ERROR_WORD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(error|failed|failure|exception|crash|traceback|typeerror|referenceerror|syntaxerror|segfault|panic|fatal|enoent)\b",
    )
    .ok()
});

/// Multi-word error phrases, matched as lowercase substrings.
const ERROR_PHRASES: &[&str] = &["cannot read", "undefined is not", "exit code"];

/// Phrases suggesting the user is asking for help.
const QUESTION_PHRASES: &[&str] = &[
    "how do i",
    "how to",
    "what if",
    "why is",
    "help me",
    "not working",
    "stuck",
    "confused",
    "any ideas",
    "suggestions",
];

/// Word-boundary code-issue markers.
static CODE_ISSUE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(todo|fixme|hack|workaround|deprecated)\b").ok());

/// Minimum app transitions in the window counted as churn.
const APP_CHURN_MIN: usize = 4;

/// Additive score plus the reasons that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub score: u32,
    pub reasons: Vec<String>,
}

/// Score a digest against its context window.
pub fn score(digest: &str, window: &ContextWindow) -> ScoreBreakdown {
    let mut total = 0u32;
    let mut reasons: Vec<String> = Vec::new();

    if let Some(term) = error_term(digest) {
        total += 3;
        reasons.push(format!("error:{term}"));
    }

    if let Some(phrase) = question_phrase(window) {
        total += 2;
        reasons.push(format!("question:{phrase}"));
    }

    if let Some(term) = code_issue_term(digest) {
        total += 1;
        reasons.push(format!("codeIssue:{term}"));
    }

    if window.app_history.len() >= APP_CHURN_MIN {
        total += 1;
        reasons.push(format!("appChurn:{}apps", window.app_history.len()));
    }

    ScoreBreakdown { score: total, reasons }
}

/// True when the text contains any error pattern. Shared with the
/// feedback collector's `error_cleared` signal.
pub fn has_error_pattern(text: &str) -> bool {
    error_term(text).is_some()
}

fn error_term(text: &str) -> Option<String> {
    if let Some(found) = ERROR_WORD_RE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
    {
        return Some(found.as_str().to_lowercase());
    }
    let lower = text.to_lowercase();
    ERROR_PHRASES.iter().find(|p| lower.contains(*p)).map(|p| (*p).to_owned())
}

fn code_issue_term(text: &str) -> Option<String> {
    CODE_ISSUE_RE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// First question phrase found in recent audio or screen OCR.
fn question_phrase(window: &ContextWindow) -> Option<String> {
    for item in &window.audio {
        let lower = item.text.to_lowercase();
        if let Some(phrase) = QUESTION_PHRASES.iter().find(|p| lower.contains(*p)) {
            return Some((*phrase).to_owned());
        }
    }
    for event in &window.screen {
        if let Some(ref ocr) = event.ocr {
            let lower = ocr.to_lowercase();
            if let Some(phrase) = QUESTION_PHRASES.iter().find(|p| lower.contains(*p)) {
                return Some((*phrase).to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "score_tests.rs"]
mod tests;
