// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::agent::AgentHandle;
use crate::buffers::feed::FeedRing;
use crate::buffers::sense::SenseRing;
use crate::config::CoreConfig;
use crate::escalation::EscalationStats;
use crate::overlay::hub::OverlayHub;
use crate::trace::TraceLog;

/// Shared server state handed to every transport handler.
pub struct CoreState {
    pub config: CoreConfig,
    /// Process-wide epoch token, immutable after init. Clients compare it
    /// across responses to detect restarts and reset their cursors.
    pub epoch: String,
    pub feed: Arc<FeedRing>,
    pub sense: Arc<SenseRing>,
    pub hub: Arc<OverlayHub>,
    pub agent: AgentHandle,
    pub stats: Arc<Mutex<EscalationStats>>,
    pub traces: Arc<TraceLog>,
    pub shutdown: CancellationToken,
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Mint a fresh epoch token: `"{ms-b36}-{rand-b36}"`.
pub fn epoch_token() -> String {
    format!("{}-{}", to_base36(epoch_ms()), to_base36(u64::from(rand::random::<u32>())))
}

fn to_base36(mut v: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if v == 0 {
        return "0".to_owned();
    }
    let mut buf = [0u8; 13];
    let mut i = buf.len();
    while v > 0 {
        i -= 1;
        buf[i] = DIGITS[(v % 36) as usize];
        v /= 36;
    }
    String::from_utf8_lossy(&buf[i..]).into_owned()
}
