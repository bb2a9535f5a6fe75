// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How eagerly digests are escalated to the external agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    Off,
    #[default]
    Selective,
    Focus,
    Rich,
}

impl EscalationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Selective => "selective",
            Self::Focus => "focus",
            Self::Rich => "rich",
        }
    }
}

impl std::fmt::Display for EscalationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Floor for the escalation cooldown; shorter values would let a noisy
/// digest stream drown the agent.
pub const MIN_ESCALATION_COOLDOWN_MS: u64 = 5_000;

/// Configuration for the sinain core server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "sinain-core", version, about = "Ambient context broker: sensor fusion, agent loop, overlay fan-out.")]
pub struct CoreConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "HOST")]
    pub host: String,

    /// Port for the shared HTTP + overlay WebSocket listener.
    #[arg(long, default_value_t = 9500, env = "PORT")]
    pub port: u16,

    /// State directory for feedback records, pending tasks, and traces.
    #[arg(long, env = "STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Audio input device name, passed through to the capture command.
    #[arg(long, default_value = "", env = "AUDIO_DEVICE")]
    pub audio_device: String,

    /// Shell command that captures audio and emits transcript lines on stdout.
    #[arg(long, env = "AUDIO_CAPTURE_COMMAND")]
    pub audio_capture_command: Option<String>,

    /// Audio chunking window in milliseconds, exported to the capture command.
    #[arg(long, default_value_t = 4_000, env = "AUDIO_CHUNK_MS")]
    pub audio_chunk_ms: u64,

    /// Start audio capture at boot.
    #[arg(long, default_value_t = false, env = "AUDIO_AUTO_START")]
    pub audio_auto_start: bool,

    /// Transcription backend identifier, exported to the capture command.
    #[arg(long, default_value = "command", env = "TRANSCRIPTION_BACKEND")]
    pub transcription_backend: String,

    /// Transcription model identifier, exported to the capture command.
    #[arg(long, default_value = "", env = "TRANSCRIPTION_MODEL")]
    pub transcription_model: String,

    /// OpenAI-compatible base URL for the analysis model. Unset disables the
    /// agent loop.
    #[arg(long, env = "AGENT_BASE_URL")]
    pub agent_base_url: Option<String>,

    /// Model used for periodic context analysis.
    #[arg(long, default_value = "gpt-4o-mini", env = "AGENT_MODEL")]
    pub agent_model: String,

    /// Debounce applied after a context nudge before analyzing.
    #[arg(long, default_value_t = 2_500, env = "AGENT_DEBOUNCE_MS")]
    pub agent_debounce_ms: u64,

    /// Minimum gap between two analyses.
    #[arg(long, default_value_t = 5_000, env = "AGENT_MIN_INTERVAL_MS")]
    pub agent_min_interval_ms: u64,

    /// Maximum gap between two analyses; also bounds debounce extension.
    #[arg(long, default_value_t = 45_000, env = "AGENT_MAX_INTERVAL_MS")]
    pub agent_max_interval_ms: u64,

    /// Escalation mode at startup.
    #[arg(long, value_enum, default_value_t = EscalationMode::Selective, env = "ESCALATION_MODE")]
    pub escalation_mode: EscalationMode,

    /// Cooldown between escalations in milliseconds (floor 5000).
    #[arg(long, default_value_t = 30_000, env = "ESCALATION_COOLDOWN_MS")]
    pub escalation_cooldown_ms: u64,

    /// WebSocket URL of the openclaw agent RPC endpoint.
    #[arg(long, env = "OPENCLAW_WS_URL")]
    pub openclaw_ws_url: Option<String>,

    /// HTTP fallback hook URL for escalations when the RPC path fails.
    #[arg(long, env = "OPENCLAW_HOOK_URL")]
    pub openclaw_hook_url: Option<String>,

    /// Bearer token for the HTTP fallback hook.
    #[arg(long, env = "OPENCLAW_HOOK_TOKEN")]
    pub openclaw_hook_token: Option<String>,

    /// Session key identifying the agent conversation.
    #[arg(long, default_value = "sinain-hud", env = "OPENCLAW_SESSION_KEY")]
    pub openclaw_session_key: String,

    /// Path to the situation markdown prepended to every analysis prompt.
    #[arg(long, env = "SITUATION_MD_PATH")]
    pub situation_md_path: Option<PathBuf>,

    /// Persist traces as JSONL under the trace directory.
    #[arg(long, default_value_t = false, env = "TRACE_ENABLED")]
    pub trace_enabled: bool,

    /// Trace directory. Defaults to `<state_dir>/traces`.
    #[arg(long, env = "TRACE_DIR")]
    pub trace_dir: Option<PathBuf>,

    /// Days of feedback records to retain.
    #[arg(long, default_value_t = 30, env = "FEEDBACK_RETENTION_DAYS")]
    pub feedback_retention_days: u32,
}

impl CoreConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolved state directory: explicit flag, else
    /// `$HOME/.local/state/sinain`, else `./state`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".local").join("state").join("sinain"),
            None => PathBuf::from("state"),
        }
    }

    pub fn trace_dir(&self) -> PathBuf {
        self.trace_dir.clone().unwrap_or_else(|| self.state_dir().join("traces"))
    }

    /// Initial runtime agent configuration derived from startup flags.
    pub fn agent_config(&self) -> crate::agent::AgentConfig {
        crate::agent::AgentConfig {
            enabled: self.agent_base_url.is_some(),
            model: self.agent_model.clone(),
            debounce_ms: self.agent_debounce_ms,
            min_interval_ms: self.agent_min_interval_ms,
            max_interval_ms: self.agent_max_interval_ms.max(self.agent_min_interval_ms),
            situation_path: self.situation_md_path.clone(),
            escalation_mode: self.escalation_mode,
            escalation_cooldown_ms: self.escalation_cooldown_ms.max(MIN_ESCALATION_COOLDOWN_MS),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
