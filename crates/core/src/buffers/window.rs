// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure context-window builder: materializes a time-bounded,
//! richness-capped snapshot from the feed and sense rings. No I/O.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::buffers::feed::{FeedItem, FeedRing, Source};
use crate::buffers::sense::{AppHistoryEntry, SenseEvent, SenseRing};

/// Default context window span.
pub const DEFAULT_WINDOW_MS: u64 = 120_000;

/// Snapshot richness preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Lean,
    Standard,
    Rich,
}

/// Size bounds applied by a preset.
#[derive(Debug, Clone, Copy)]
pub struct PresetBounds {
    pub max_screen: usize,
    pub max_audio: usize,
    pub max_ocr_chars: usize,
    pub max_transcript_chars: usize,
    pub max_images: usize,
}

impl Preset {
    pub fn bounds(self) -> PresetBounds {
        match self {
            Self::Lean => PresetBounds {
                max_screen: 5,
                max_audio: 5,
                max_ocr_chars: 600,
                max_transcript_chars: 600,
                max_images: 0,
            },
            Self::Standard => PresetBounds {
                max_screen: 10,
                max_audio: 10,
                max_ocr_chars: 1_200,
                max_transcript_chars: 1_200,
                max_images: 1,
            },
            Self::Rich => PresetBounds {
                max_screen: 20,
                max_audio: 20,
                max_ocr_chars: 2_400,
                max_transcript_chars: 2_400,
                max_images: 3,
            },
        }
    }
}

/// An image attachment lifted out of a sense event, base64-encoded.
#[derive(Debug, Clone, Serialize)]
pub struct ContextImage {
    pub data: String,
    pub app: String,
    pub ts: u64,
}

/// Ephemeral snapshot over both rings. `screen` is newest-first, `audio`
/// oldest-first within the cap.
#[derive(Debug, Clone, Serialize)]
pub struct ContextWindow {
    pub audio: Vec<FeedItem>,
    pub screen: Vec<SenseEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ContextImage>,
    pub current_app: String,
    pub app_history: Vec<AppHistoryEntry>,
    pub window_ms: u64,
    pub newest_event_ts: u64,
    pub preset: Preset,
}

/// Build a snapshot at `now` covering the last `max_age_ms` milliseconds.
pub fn build_window(
    feed: &FeedRing,
    sense: &SenseRing,
    preset: Preset,
    max_age_ms: u64,
    now: u64,
) -> ContextWindow {
    let bounds = preset.bounds();
    let cutoff = now.saturating_sub(max_age_ms);

    // Last N audio items in the window, oldest first.
    let mut audio = feed.query_by_source(Source::Audio, cutoff);
    if audio.len() > bounds.max_audio {
        audio.drain(..audio.len() - bounds.max_audio);
    }
    for item in &mut audio {
        truncate_chars(&mut item.text, bounds.max_transcript_chars);
    }

    // Screen events in the window, coalesced by equal-OCR-same-app, capped,
    // then reversed to newest-first.
    let mut screen: Vec<SenseEvent> = Vec::new();
    for event in sense.query_by_time(cutoff) {
        let duplicate = screen
            .last()
            .map(|prev| prev.app == event.app && prev.ocr.is_some() && prev.ocr == event.ocr)
            .unwrap_or(false);
        if !duplicate {
            screen.push(event);
        }
    }
    if screen.len() > bounds.max_screen {
        screen.drain(..screen.len() - bounds.max_screen);
    }
    screen.reverse();
    for event in &mut screen {
        if let Some(ref mut ocr) = event.ocr {
            truncate_chars(ocr, bounds.max_ocr_chars);
        }
    }

    let images: Vec<ContextImage> = if bounds.max_images == 0 {
        Vec::new()
    } else {
        sense
            .recent_images(bounds.max_images)
            .into_iter()
            .filter_map(|e| {
                e.image.map(|data| ContextImage {
                    data: STANDARD.encode(data),
                    app: e.app,
                    ts: e.ts,
                })
            })
            .collect()
    };

    let current_app = screen
        .first()
        .map(|e| e.app.clone())
        .unwrap_or_else(|| "unknown".to_owned());

    let app_history = sense.app_history(cutoff);

    let newest_audio = audio.last().map(|i| i.ts).unwrap_or(0);
    let newest_screen = screen.first().map(|e| e.ts).unwrap_or(0);

    ContextWindow {
        audio,
        screen,
        images,
        current_app,
        app_history,
        window_ms: max_age_ms,
        newest_event_ts: newest_audio.max(newest_screen),
        preset,
    }
}

/// Truncate in place to at most `max` chars, on a char boundary.
fn truncate_chars(text: &mut String, max: usize) {
    if let Some((byte_idx, _)) = text.char_indices().nth(max) {
        text.truncate(byte_idx);
    }
}

#[cfg(test)]
#[path = "window_tests.rs"]
mod tests;
