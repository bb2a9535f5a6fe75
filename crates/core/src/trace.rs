// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded in-memory trace ring for the `/traces` endpoint, with an
//! optional JSONL sink under the trace directory.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

use crate::state::epoch_ms;

/// Retained trace entries.
const TRACE_CAPACITY: usize = 512;

/// One recorded trace event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub id: u64,
    pub ts: u64,
    pub kind: String,
    pub data: serde_json::Value,
}

struct TraceInner {
    entries: VecDeque<TraceEntry>,
    next_id: u64,
}

/// Trace log: in-memory ring always on; JSONL persistence when enabled.
pub struct TraceLog {
    inner: Mutex<TraceInner>,
    sink: Option<PathBuf>,
}

impl TraceLog {
    /// Create a trace log. When `enabled`, entries are also appended to
    /// `traces.jsonl` under `dir` (created best-effort).
    pub fn new(enabled: bool, dir: PathBuf) -> Self {
        let sink = if enabled {
            let _ = std::fs::create_dir_all(&dir);
            Some(dir.join("traces.jsonl"))
        } else {
            None
        };
        Self {
            inner: Mutex::new(TraceInner {
                entries: VecDeque::with_capacity(TRACE_CAPACITY),
                next_id: 1,
            }),
            sink,
        }
    }

    pub fn record(&self, kind: &str, data: serde_json::Value) {
        let entry = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let entry = TraceEntry {
                id: inner.next_id,
                ts: epoch_ms(),
                kind: kind.to_owned(),
                data,
            };
            inner.next_id += 1;
            if inner.entries.len() == TRACE_CAPACITY {
                inner.entries.pop_front();
            }
            inner.entries.push_back(entry.clone());
            entry
        };

        if let Some(ref path) = self.sink {
            if let Ok(mut line) = serde_json::to_string(&entry) {
                line.push('\n');
                if let Ok(mut file) =
                    std::fs::OpenOptions::new().create(true).append(true).open(path)
                {
                    let _ = file.write_all(line.as_bytes());
                }
            }
        }
    }

    /// Entries with `id > after`, oldest first, capped at `limit`.
    pub fn query(&self, after: u64, limit: usize) -> Vec<TraceEntry> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.entries.iter().filter(|e| e.id > after).take(limit).cloned().collect()
    }

    /// Total entries ever recorded.
    pub fn count(&self) -> u64 {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.next_id - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_by_id_and_limit() {
        let log = TraceLog::new(false, PathBuf::from("unused"));
        for n in 0..10 {
            log.record("tick", serde_json::json!({ "n": n }));
        }
        let entries = log.query(4, 3);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, 5);
        assert_eq!(log.count(), 10);
    }

    #[test]
    fn ring_is_bounded() {
        let log = TraceLog::new(false, PathBuf::from("unused"));
        for n in 0..(TRACE_CAPACITY + 20) {
            log.record("tick", serde_json::json!({ "n": n }));
        }
        assert_eq!(log.query(0, usize::MAX).len(), TRACE_CAPACITY);
    }

    #[test]
    fn jsonl_sink_written_when_enabled() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("tempdir: {e}"),
        };
        let log = TraceLog::new(true, dir.path().to_path_buf());
        log.record("escalation", serde_json::json!({"score": 4}));
        log.record("escalation", serde_json::json!({"score": 2}));

        let contents =
            std::fs::read_to_string(dir.path().join("traces.jsonl")).unwrap_or_default();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"kind\":\"escalation\""));
    }
}
