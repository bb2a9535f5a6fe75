// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, ordered ring of outbound text items. Single writer at a time,
//! many readers via value-copy snapshots. Admission and queries are
//! non-suspending; no lock is ever held across I/O.

use std::collections::VecDeque;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::state::epoch_ms;

/// Default feed ring capacity.
pub const FEED_CAPACITY: usize = 100;

/// Delivery priority, totally ordered: `urgent > high > normal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

/// Origin of a feed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Audio,
    System,
    Openclaw,
}

/// Delivery channel: the live overlay stream or the agent reply lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stream,
    Agent,
}

/// One admitted feed item. Never mutated after admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: u64,
    pub ts: u64,
    pub text: String,
    pub priority: Priority,
    pub source: Source,
    pub channel: Channel,
}

struct FeedInner {
    items: VecDeque<FeedItem>,
    next_id: u64,
}

/// Bounded ordered feed ring. Oldest items are evicted whole when full.
pub struct FeedRing {
    capacity: usize,
    inner: RwLock<FeedInner>,
}

impl FeedRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(FeedInner {
                items: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    /// Admit a new item, evicting the oldest when at capacity.
    /// Returns a value copy of the admitted item.
    pub fn push(
        &self,
        text: impl Into<String>,
        priority: Priority,
        source: Source,
        channel: Channel,
    ) -> FeedItem {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let item = FeedItem {
            id: inner.next_id,
            ts: epoch_ms(),
            text: text.into(),
            priority,
            source,
            channel,
        };
        inner.next_id += 1;
        if inner.items.len() == self.capacity {
            inner.items.pop_front();
        }
        inner.items.push_back(item.clone());
        item
    }

    /// Items with `id > after_id`, in admission order.
    pub fn query(&self, after_id: u64) -> Vec<FeedItem> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.items.iter().filter(|i| i.id > after_id).cloned().collect()
    }

    /// Items from `source` with `ts >= since_ts`, in admission order.
    pub fn query_by_source(&self, source: Source, since_ts: u64) -> Vec<FeedItem> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .items
            .iter()
            .filter(|i| i.source == source && i.ts >= since_ts)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(guard) => guard.items.len(),
            Err(poisoned) => poisoned.into_inner().items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "feed_tests.rs"]
mod tests;
