// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overlay hub — fans out feed and status frames to connected overlay
//! clients over per-client bounded queues, and routes incoming command
//! frames to registered listeners.
//!
//! Backpressure: a client whose queue is full is closed, never awaited on.
//! Liveness: a ping every 30 s; clients missing 3 consecutive pongs drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::buffers::feed::{Channel, FeedItem, Priority};
use crate::state::epoch_ms;

/// Per-client outbound queue capacity.
pub const CLIENT_QUEUE_CAP: usize = 64;

/// Interval between liveness pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive missed pongs before a client is dropped.
const MAX_MISSED_PONGS: u32 = 3;

/// Overlay status synced to every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayStatus {
    pub audio: String,
    pub connection: String,
    pub screen: String,
    pub mode: String,
}

impl Default for OverlayStatus {
    fn default() -> Self {
        Self {
            audio: "off".to_owned(),
            connection: "off".to_owned(),
            screen: "idle".to_owned(),
            mode: "selective".to_owned(),
        }
    }
}

/// Partial status update; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub audio: Option<String>,
    pub connection: Option<String>,
    pub screen: Option<String>,
    pub mode: Option<String>,
}

/// Payload of a `feed` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFrame {
    pub id: u64,
    pub text: String,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    pub ts: u64,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OverlayFrame {
    Status { data: OverlayStatus },
    Feed { data: FeedFrame },
    Ping { ts: u64 },
}

/// Client → server frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Command {
        action: String,
        #[serde(default)]
        params: Option<serde_json::Value>,
    },
    Pong {
        #[serde(default)]
        ts: u64,
    },
}

/// A command received from an overlay client, fanned to subscribers.
#[derive(Debug, Clone)]
pub struct OverlayCommand {
    pub action: String,
    pub params: Option<serde_json::Value>,
}

struct ClientSlot {
    tx: mpsc::Sender<OverlayFrame>,
    connected_at: u64,
    last_pong_ts: u64,
    missed_pongs: u32,
}

/// Bookkeeping snapshot for one connected client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: u64,
    pub connected_at: u64,
    pub last_pong_ts: u64,
}

/// Fan-out hub for overlay clients.
pub struct OverlayHub {
    clients: Mutex<HashMap<u64, ClientSlot>>,
    next_id: AtomicU64,
    status: Mutex<OverlayStatus>,
    command_tx: broadcast::Sender<OverlayCommand>,
}

impl OverlayHub {
    pub fn new(initial: OverlayStatus) -> Self {
        let (command_tx, _) = broadcast::channel(64);
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            status: Mutex::new(initial),
            command_tx,
        }
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ClientSlot>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, OverlayStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a new client. The current status frame is enqueued first so
    /// every client starts from a synced state.
    pub fn register(&self) -> (u64, mpsc::Receiver<OverlayFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAP);
        let now = epoch_ms();

        let status = self.lock_status().clone();
        let _ = tx.try_send(OverlayFrame::Status { data: status });

        self.lock_clients().insert(
            id,
            ClientSlot { tx, connected_at: now, last_pong_ts: now, missed_pongs: 0 },
        );
        tracing::debug!(client_id = id, "overlay client connected");
        (id, rx)
    }

    pub fn remove(&self, id: u64) {
        if self.lock_clients().remove(&id).is_some() {
            tracing::debug!(client_id = id, "overlay client removed");
        }
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    /// Snapshot of connected-client bookkeeping, ordered by id.
    pub fn clients(&self) -> Vec<ClientInfo> {
        let clients = self.lock_clients();
        let mut list: Vec<ClientInfo> = clients
            .iter()
            .map(|(id, slot)| ClientInfo {
                id: *id,
                connected_at: slot.connected_at,
                last_pong_ts: slot.last_pong_ts,
            })
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    /// Fan a frame out to every client. Clients with a full queue are
    /// closed. Returns the number of clients the frame was enqueued for.
    fn fan_out(&self, frame: &OverlayFrame) -> usize {
        let mut clients = self.lock_clients();
        let mut dropped: Vec<u64> = Vec::new();
        let mut enqueued = 0usize;
        for (id, slot) in clients.iter() {
            match slot.tx.try_send(frame.clone()) {
                Ok(()) => enqueued += 1,
                Err(mpsc::error::TrySendError::Full(_))
                | Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            clients.remove(&id);
            tracing::debug!(client_id = id, "overlay client dropped (queue full or closed)");
        }
        enqueued
    }

    /// Broadcast a feed frame built from raw parts. Returns the number of
    /// clients it was enqueued for.
    pub fn broadcast(
        &self,
        id: u64,
        text: impl Into<String>,
        priority: Priority,
        channel: Option<Channel>,
    ) -> usize {
        let frame = OverlayFrame::Feed {
            data: FeedFrame { id, text: text.into(), priority, channel, ts: epoch_ms() },
        };
        self.fan_out(&frame)
    }

    /// Broadcast an admitted feed item.
    pub fn broadcast_item(&self, item: &FeedItem) -> usize {
        let frame = OverlayFrame::Feed {
            data: FeedFrame {
                id: item.id,
                text: item.text.clone(),
                priority: item.priority,
                channel: Some(item.channel),
                ts: item.ts,
            },
        };
        self.fan_out(&frame)
    }

    /// Merge a partial status update; broadcasts only when something changed.
    pub fn update_state(&self, patch: StatusPatch) {
        let updated = {
            let mut status = self.lock_status();
            let before = status.clone();
            if let Some(audio) = patch.audio {
                status.audio = audio;
            }
            if let Some(connection) = patch.connection {
                status.connection = connection;
            }
            if let Some(screen) = patch.screen {
                status.screen = screen;
            }
            if let Some(mode) = patch.mode {
                status.mode = mode;
            }
            if *status == before {
                None
            } else {
                Some(status.clone())
            }
        };
        if let Some(status) = updated {
            self.fan_out(&OverlayFrame::Status { data: status });
        }
    }

    pub fn status(&self) -> OverlayStatus {
        self.lock_status().clone()
    }

    /// Record a pong from a client, resetting its missed-pong counter.
    pub fn record_pong(&self, id: u64, ts: u64) {
        if let Some(slot) = self.lock_clients().get_mut(&id) {
            slot.last_pong_ts = if ts > 0 { ts } else { epoch_ms() };
            slot.missed_pongs = 0;
        }
    }

    /// Subscribe to incoming overlay commands.
    pub fn commands(&self) -> broadcast::Receiver<OverlayCommand> {
        self.command_tx.subscribe()
    }

    /// Route an incoming command frame to all subscribers.
    pub fn route_command(&self, command: OverlayCommand) {
        tracing::debug!(action = %command.action, "overlay command");
        let _ = self.command_tx.send(command);
    }

    /// One ping round: drop clients over the missed-pong limit, then ping
    /// the rest. Exposed for tests; the ping task calls this on a timer.
    pub fn ping_round(&self) {
        let mut clients = self.lock_clients();
        let stale: Vec<u64> = clients
            .iter()
            .filter(|(_, slot)| slot.missed_pongs >= MAX_MISSED_PONGS)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            clients.remove(&id);
            tracing::debug!(client_id = id, "overlay client dropped (missed pongs)");
        }

        let ts = epoch_ms();
        let mut dropped: Vec<u64> = Vec::new();
        for (id, slot) in clients.iter_mut() {
            slot.missed_pongs += 1;
            if slot.tx.try_send(OverlayFrame::Ping { ts }).is_err() {
                dropped.push(*id);
            }
        }
        for id in dropped {
            clients.remove(&id);
        }
    }
}

/// Spawn the hub's liveness ping task.
pub fn spawn_ping_task(hub: Arc<OverlayHub>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(PING_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            hub.ping_round();
        }
    });
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
