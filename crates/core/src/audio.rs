// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audio capture wiring. The capture command owns the microphone and the
//! transcription backend; this side only spawns it, reads transcript lines
//! from its stdout, and feeds them into the broker. Raw audio never enters
//! the core.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentHandle;
use crate::buffers::feed::{Channel, FeedRing, Priority, Source};
use crate::config::CoreConfig;
use crate::overlay::hub::{OverlayCommand, OverlayHub, StatusPatch};

#[derive(Debug, Clone)]
struct AudioSettings {
    command: Option<String>,
    device: String,
    chunk_ms: u64,
    backend: String,
    model: String,
}

#[derive(Default)]
struct AudioState {
    running: bool,
    muted: bool,
    child: Option<tokio::process::Child>,
}

/// Controls the audio capture subprocess.
pub struct AudioControl {
    settings: AudioSettings,
    feed: Arc<FeedRing>,
    hub: Arc<OverlayHub>,
    agent: AgentHandle,
    state: Mutex<AudioState>,
    cancel: CancellationToken,
}

impl AudioControl {
    pub fn new(
        config: &CoreConfig,
        feed: Arc<FeedRing>,
        hub: Arc<OverlayHub>,
        agent: AgentHandle,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings: AudioSettings {
                command: config.audio_capture_command.clone(),
                device: config.audio_device.clone(),
                chunk_ms: config.audio_chunk_ms,
                backend: config.transcription_backend.clone(),
                model: config.transcription_model.clone(),
            },
            feed,
            hub,
            agent,
            state: Mutex::new(AudioState::default()),
            cancel,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AudioState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the capture command and start consuming transcript lines.
    pub fn start(self: &Arc<Self>) {
        let Some(ref command) = self.settings.command else {
            tracing::debug!("audio start requested without a capture command");
            return;
        };
        {
            let state = self.lock_state();
            if state.running {
                return;
            }
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", command]);
        cmd.env("AUDIO_DEVICE", &self.settings.device);
        cmd.env("AUDIO_CHUNK_MS", self.settings.chunk_ms.to_string());
        cmd.env("TRANSCRIPTION_BACKEND", &self.settings.backend);
        cmd.env("TRANSCRIPTION_MODEL", &self.settings.model);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(err = %e, "audio capture command failed to spawn");
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            tracing::warn!("audio capture command has no stdout");
            return;
        };

        {
            let mut state = self.lock_state();
            state.running = true;
            state.child = Some(child);
        }
        self.sync_status();
        tracing::info!("audio capture started");

        let control = Arc::clone(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(text)) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if control.lock_state().muted {
                            continue;
                        }
                        let item = control.feed.push(
                            text,
                            Priority::Normal,
                            Source::Audio,
                            Channel::Stream,
                        );
                        control.hub.broadcast_item(&item);
                        control.agent.nudge();
                    }
                    Ok(None) => break, // capture command exited
                    Err(e) => {
                        tracing::warn!(err = %e, "audio transcript read failed");
                        break;
                    }
                }
            }
            {
                let mut state = control.lock_state();
                state.running = false;
                state.child = None;
            }
            control.sync_status();
            tracing::info!("audio capture stopped");
        });
    }

    /// Kill the capture command. The reader task notices EOF and finishes
    /// the state transition.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if let Some(ref mut child) = state.child {
            let _ = child.start_kill();
        }
    }

    pub fn toggle(self: &Arc<Self>) {
        let running = self.lock_state().running;
        if running {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn toggle_mute(&self) {
        {
            let mut state = self.lock_state();
            state.muted = !state.muted;
        }
        self.sync_status();
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    fn sync_status(&self) {
        let audio = {
            let state = self.lock_state();
            if !state.running {
                "off"
            } else if state.muted {
                "muted"
            } else {
                "on"
            }
        };
        self.hub
            .update_state(StatusPatch { audio: Some(audio.to_owned()), ..Default::default() });
    }
}

/// Route overlay commands to the audio control. Unknown actions are left
/// for other subscribers.
pub fn spawn_command_router(
    audio: Arc<AudioControl>,
    hub: Arc<OverlayHub>,
    cancel: CancellationToken,
) {
    let mut commands = hub.commands();
    tokio::spawn(async move {
        loop {
            let command: OverlayCommand = tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Ok(command) => command,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            };
            match command.action.as_str() {
                "mute_audio" => audio.toggle_mute(),
                "toggle_audio" => audio.toggle(),
                "switch_device" => {
                    // Device selection lives in the capture command's env;
                    // a restart re-reads it.
                    tracing::info!("switch_device requested, restarting capture");
                    audio.stop();
                    audio.start();
                }
                "scroll_feed" => {} // rendered client-side
                other => {
                    tracing::debug!(action = %other, "unhandled overlay command");
                }
            }
        }
    });
}
