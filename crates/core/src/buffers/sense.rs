// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded ring of screen/OCR sensor events with admission-time
//! deduplication and a compressed app-transition history.

use std::collections::VecDeque;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Default sense ring capacity.
pub const SENSE_CAPACITY: usize = 30;

/// Bound on retained app transitions.
const APP_HISTORY_CAPACITY: usize = 256;

/// Closed set of sensor event kinds. Unknown kinds are rejected at the
/// HTTP boundary before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenseKind {
    Text,
    Context,
    Image,
}

impl SenseKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "context" => Some(Self::Context),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Pixel rectangle for a region-of-interest capture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// One admitted sensor event. Never mutated after admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenseEvent {
    pub id: u64,
    pub ts: u64,
    #[serde(rename = "type")]
    pub kind: SenseKind,
    pub app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    pub screen_id: i32,
    pub ssim: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<String>,
    #[serde(default, with = "b64", skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Rect>,
}

impl SenseEvent {
    /// Copy with the heavy payloads stripped, for `meta_only` queries.
    fn meta_only(&self) -> Self {
        Self { ocr: None, image: None, ..self.clone() }
    }
}

/// An app transition derived from admitted events. Contiguous runs of the
/// same app collapse to their first entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppHistoryEntry {
    pub ts: u64,
    pub app: String,
}

/// Result of offering an event to the ring.
#[derive(Debug)]
pub enum Admission {
    Admitted(SenseEvent),
    /// Same app + identical OCR as the most recent event: coalesced.
    Deduplicated,
}

/// Admission counters accumulated since the last flush.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SenseDeltas {
    pub admitted: u64,
    pub deduplicated: u64,
    pub ocr_chars: u64,
}

/// Fields the caller supplies for admission; id assignment is the ring's.
#[derive(Debug)]
pub struct SenseInput {
    pub ts: u64,
    pub kind: SenseKind,
    pub app: String,
    pub window_title: Option<String>,
    pub screen_id: i32,
    pub ssim: f64,
    pub ocr: Option<String>,
    pub image: Option<Vec<u8>>,
    pub bbox: Option<Rect>,
}

struct SenseInner {
    events: VecDeque<SenseEvent>,
    next_id: u64,
    app_history: VecDeque<AppHistoryEntry>,
    deltas: SenseDeltas,
}

/// Bounded sensor event ring.
pub struct SenseRing {
    capacity: usize,
    inner: RwLock<SenseInner>,
}

impl SenseRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(SenseInner {
                events: VecDeque::with_capacity(capacity),
                next_id: 1,
                app_history: VecDeque::new(),
                deltas: SenseDeltas::default(),
            }),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SenseInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SenseInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Offer an event. Consecutive events with identical `(app, ocr)` are
    /// coalesced into the existing entry and reported as deduplicated.
    pub fn admit(&self, input: SenseInput) -> Admission {
        let mut inner = self.write();

        if let Some(last) = inner.events.back() {
            if last.app == input.app && last.ocr.is_some() && last.ocr == input.ocr {
                inner.deltas.deduplicated += 1;
                return Admission::Deduplicated;
            }
        }

        let event = SenseEvent {
            id: inner.next_id,
            ts: input.ts,
            kind: input.kind,
            app: input.app,
            window_title: input.window_title,
            screen_id: input.screen_id,
            ssim: input.ssim,
            ocr: input.ocr,
            image: input.image,
            bbox: input.bbox,
        };
        inner.next_id += 1;

        // App history compresses contiguous runs to their first entry.
        let changed_app =
            inner.app_history.back().map(|e| e.app != event.app).unwrap_or(true);
        if changed_app {
            if inner.app_history.len() == APP_HISTORY_CAPACITY {
                inner.app_history.pop_front();
            }
            inner
                .app_history
                .push_back(AppHistoryEntry { ts: event.ts, app: event.app.clone() });
        }

        inner.deltas.admitted += 1;
        inner.deltas.ocr_chars +=
            event.ocr.as_ref().map(|o| o.chars().count() as u64).unwrap_or(0);

        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        Admission::Admitted(event)
    }

    /// Events with `id > after_id`, admission order. `meta_only` strips OCR
    /// and image payloads.
    pub fn query(&self, after_id: u64, meta_only: bool) -> Vec<SenseEvent> {
        let inner = self.read();
        inner
            .events
            .iter()
            .filter(|e| e.id > after_id)
            .map(|e| if meta_only { e.meta_only() } else { e.clone() })
            .collect()
    }

    /// Events with `ts >= since_ts`, admission order.
    pub fn query_by_time(&self, since_ts: u64) -> Vec<SenseEvent> {
        let inner = self.read();
        inner.events.iter().filter(|e| e.ts >= since_ts).cloned().collect()
    }

    /// Compressed app transitions with `ts >= since_ts`.
    pub fn app_history(&self, since_ts: u64) -> Vec<AppHistoryEntry> {
        let inner = self.read();
        inner.app_history.iter().filter(|e| e.ts >= since_ts).cloned().collect()
    }

    /// Up to `n` most recent image-bearing events, newest first.
    pub fn recent_images(&self, n: usize) -> Vec<SenseEvent> {
        let inner = self.read();
        inner
            .events
            .iter()
            .rev()
            .filter(|e| e.image.is_some())
            .take(n)
            .cloned()
            .collect()
    }

    /// `(ts, app)` of the newest event, if any.
    pub fn latest_activity(&self) -> Option<(u64, String)> {
        let inner = self.read();
        inner.events.back().map(|e| (e.ts, e.app.clone()))
    }

    /// Admission counters since the last flush. `flush` resets them.
    pub fn accumulated_deltas(&self, flush: bool) -> SenseDeltas {
        let mut inner = self.write();
        let deltas = inner.deltas;
        if flush {
            inner.deltas = SenseDeltas::default();
        }
        deltas
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Base64 (de)serialization for optional image payloads.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(text) => STANDARD.decode(text).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "sense_tests.rs"]
mod tests;
