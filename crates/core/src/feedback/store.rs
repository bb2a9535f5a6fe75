// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daily append-only JSONL store for feedback records.
//!
//! One file per UTC day under `<state_dir>/feedback/`. Appends go through a
//! held-open writer that rotates when the date changes. Signal updates
//! rewrite the target day atomically (tmp + rename) and reopen the writer
//! when the rewritten day is the one currently open.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};

use super::{FeedbackRecord, FeedbackSignals};

/// Days scanned by `query_recent` (today plus six prior).
const RECENT_DAYS: i64 = 7;

struct DayWriter {
    date: String,
    file: File,
}

/// Append-only daily feedback store.
pub struct FeedbackStore {
    dir: PathBuf,
    retention_days: u32,
    writer: Mutex<Option<DayWriter>>,
}

/// UTC calendar date (`YYYY-MM-DD`) of an epoch-millis timestamp.
pub fn utc_date(ts_ms: u64) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(ts_ms as i64).unwrap_or_default();
    format!("{:04}-{:02}-{:02}", datetime.year(), datetime.month(), datetime.day())
}

fn today() -> String {
    utc_date(crate::state::epoch_ms())
}

impl FeedbackStore {
    pub fn open(dir: impl Into<PathBuf>, retention_days: u32) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating feedback dir {}", dir.display()))?;
        Ok(Self { dir, retention_days, writer: Mutex::new(None) })
    }

    fn day_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}.jsonl"))
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, Option<DayWriter>> {
        match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a record to its day file, rotating the writer on date change.
    pub fn append(&self, record: &FeedbackRecord) -> anyhow::Result<()> {
        let date = utc_date(record.ts);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut guard = self.lock_writer();
        let rotate = guard.as_ref().map(|w| w.date != date).unwrap_or(true);
        if rotate {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.day_path(&date))
                .with_context(|| format!("opening day file for {date}"))?;
            *guard = Some(DayWriter { date: date.clone(), file });
        }
        if let Some(ref mut writer) = *guard {
            writer.file.write_all(line.as_bytes())?;
            writer.file.flush()?;
        }
        Ok(())
    }

    /// Replace the signals of one record in `date`'s file. Returns false
    /// when the record is not present. The rewrite is atomic; if the
    /// rewritten day is currently open for append, the writer is reopened.
    pub fn update_signals(
        &self,
        id: &str,
        date: &str,
        signals: FeedbackSignals,
    ) -> anyhow::Result<bool> {
        let path = self.day_path(date);
        let mut guard = self.lock_writer();

        // Close the writer while rewriting its file so the rename does not
        // orphan buffered appends.
        let reopen = guard.as_ref().map(|w| w.date == date).unwrap_or(false);
        if reopen {
            *guard = None;
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let mut found = false;
        let mut rewritten = String::with_capacity(contents.len());
        for line in contents.lines() {
            match serde_json::from_str::<FeedbackRecord>(line) {
                Ok(mut record) if record.id == id => {
                    record.signals = signals;
                    rewritten.push_str(&serde_json::to_string(&record)?);
                    rewritten.push('\n');
                    found = true;
                }
                _ => {
                    rewritten.push_str(line);
                    rewritten.push('\n');
                }
            }
        }

        if found {
            let tmp_path = path.with_extension("tmp");
            std::fs::write(&tmp_path, rewritten)?;
            std::fs::rename(&tmp_path, &path)?;
        }

        if reopen {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *guard = Some(DayWriter { date: date.to_owned(), file });
        }
        Ok(found)
    }

    /// All records of one day, file order (chronological).
    pub fn query_day(&self, date: &str) -> Vec<FeedbackRecord> {
        let Ok(contents) = std::fs::read_to_string(self.day_path(date)) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| serde_json::from_str::<FeedbackRecord>(line).ok())
            .collect()
    }

    /// Up to `limit` records scanning today and up to six prior days,
    /// newest first.
    pub fn query_recent(&self, limit: usize) -> Vec<FeedbackRecord> {
        let now = Utc::now();
        let mut out: Vec<FeedbackRecord> = Vec::new();
        for days_back in 0..RECENT_DAYS {
            let day = now - ChronoDuration::days(days_back);
            let date =
                format!("{:04}-{:02}-{:02}", day.year(), day.month(), day.day());
            let mut records = self.query_day(&date);
            records.reverse();
            for record in records {
                if out.len() == limit {
                    return out;
                }
                out.push(record);
            }
        }
        out
    }

    /// Delete day files older than the retention cutoff. Returns the number
    /// of files removed.
    pub fn prune(&self) -> anyhow::Result<usize> {
        let cutoff_day = Utc::now() - ChronoDuration::days(i64::from(self.retention_days));
        let cutoff = format!(
            "{:04}-{:02}-{:02}",
            cutoff_day.year(),
            cutoff_day.month(),
            cutoff_day.day()
        );
        let mut removed = 0usize;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(date) = day_of_file(&entry.path()) else {
                continue;
            };
            // Lexicographic comparison works for zero-padded ISO dates.
            if date.as_str() < cutoff.as_str() {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "pruned feedback day files");
        }
        Ok(removed)
    }

    /// Date key of the currently open writer, if any. Used by tests.
    pub fn open_day(&self) -> Option<String> {
        self.lock_writer().as_ref().map(|w| w.date.clone())
    }

    /// Convenience: all of today's records.
    pub fn today_records(&self) -> Vec<FeedbackRecord> {
        self.query_day(&today())
    }
}

fn day_of_file(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let date = name.strip_suffix(".jsonl")?;
    if date.len() == 10 && date.as_bytes()[4] == b'-' && date.as_bytes()[7] == b'-' {
        Some(date.to_owned())
    } else {
        None
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
