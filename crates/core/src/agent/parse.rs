// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tolerant extraction of the analysis envelope from raw model output.
//! Malformed output degrades to an idle entry; it never fails the loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cap on scanned top-level JSON objects per reply.
const MAX_SCANNED_OBJECTS: usize = 8;

/// Optional feedback-tagging directive returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDirective {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Parsed analysis envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisEnvelope {
    pub digest: String,
    pub hud: String,
    pub task: Option<String>,
    pub record: Option<RecordDirective>,
}

impl AnalysisEnvelope {
    fn idle() -> Self {
        Self { digest: String::new(), hud: "Idle".to_owned(), task: None, record: None }
    }
}

/// Extract `{digest, hud, task?, record?}` from a model reply. The reply
/// may wrap the envelope in prose or code fences; the first JSON object
/// carrying a `digest` or `hud` string wins.
pub fn parse_envelope(reply: &str) -> AnalysisEnvelope {
    for object in scan_json_objects(reply) {
        let digest = object.get("digest").and_then(Value::as_str);
        let hud = object.get("hud").and_then(Value::as_str);
        if digest.is_none() && hud.is_none() {
            continue;
        }
        let task = object
            .get("task")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned);
        let record = object
            .get("record")
            .cloned()
            .and_then(|v| serde_json::from_value::<RecordDirective>(v).ok());
        return AnalysisEnvelope {
            digest: digest.unwrap_or_default().to_owned(),
            hud: hud.filter(|h| !h.trim().is_empty()).unwrap_or("Idle").to_owned(),
            task,
            record,
        };
    }
    AnalysisEnvelope::idle()
}

/// Scan text for balanced top-level JSON objects and return those that
/// parse. String literals and escapes are honored so braces inside quoted
/// text do not confuse the walker.
pub fn scan_json_objects(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() && objects.len() < MAX_SCANNED_OBJECTS {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match balanced_end(bytes, i) {
            Some(end) => {
                if let Ok(value) = serde_json::from_slice::<Value>(&bytes[i..=end]) {
                    if value.is_object() {
                        objects.push(value);
                        i = end + 1;
                        continue;
                    }
                }
                // Unparseable despite balancing: step past the opener and
                // keep looking for a nested candidate.
                i += 1;
            }
            None => {
                i += 1;
            }
        }
    }
    objects
}

/// Index of the `}` closing the object opened at `start`, if balanced.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
