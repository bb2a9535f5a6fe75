// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sinain core: ambient-context broker. Fuses screen/audio sensor streams
//! into a situational digest, escalates the interesting ones to an external
//! agent, fans replies out to overlay clients, and scores each escalation
//! after the fact.

pub mod agent;
pub mod audio;
pub mod buffers;
pub mod config;
pub mod error;
pub mod escalation;
pub mod feedback;
pub mod overlay;
pub mod state;
pub mod trace;
pub mod transport;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::analyzer::Analyzer;
use crate::agent::{AgentHandle, AgentLoop};
use crate::audio::AudioControl;
use crate::buffers::feed::{FeedRing, FEED_CAPACITY};
use crate::buffers::sense::{SenseRing, SENSE_CAPACITY};
use crate::config::CoreConfig;
use crate::escalation::hook::HookClient;
use crate::escalation::rpc::AgentRpc;
use crate::escalation::spawn::SpawnTracker;
use crate::escalation::{Escalator, EscalationStats};
use crate::feedback::collector::SignalCollector;
use crate::feedback::store::FeedbackStore;
use crate::overlay::hub::{OverlayHub, OverlayStatus};
use crate::state::{epoch_token, CoreState};
use crate::trace::TraceLog;

/// Failure phase, mapped to the process exit code: startup faults exit 1,
/// runtime faults exit 2.
#[derive(Debug)]
pub enum RunError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Startup(_) => 1,
            Self::Runtime(_) => 2,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup(e) => write!(f, "startup: {e:#}"),
            Self::Runtime(e) => write!(f, "runtime: {e:#}"),
        }
    }
}

impl std::error::Error for RunError {}

/// Run the core server until a shutdown signal.
pub async fn run(config: CoreConfig) -> Result<(), RunError> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)
        .map_err(|e| RunError::Startup(anyhow::Error::from(e)))?;

    // Buffers.
    let feed = Arc::new(FeedRing::new(FEED_CAPACITY));
    let sense = Arc::new(SenseRing::new(SENSE_CAPACITY));

    // Overlay hub.
    let hub = Arc::new(OverlayHub::new(OverlayStatus {
        audio: "off".to_owned(),
        connection: if config.openclaw_ws_url.is_some() { "ready" } else { "off" }.to_owned(),
        screen: "idle".to_owned(),
        mode: config.escalation_mode.as_str().to_owned(),
    }));
    overlay::hub::spawn_ping_task(Arc::clone(&hub), shutdown.child_token());

    // Traces.
    let traces = Arc::new(TraceLog::new(config.trace_enabled, config.trace_dir()));

    // Feedback store + deferred signal collector.
    let store = Arc::new(
        FeedbackStore::open(state_dir.join("feedback"), config.feedback_retention_days)
            .map_err(RunError::Startup)?,
    );
    if let Err(e) = store.prune() {
        tracing::warn!(err = %e, "feedback prune failed");
    }
    let agent_handle = AgentHandle::new(config.agent_config());
    let collector = SignalCollector::new(
        Arc::clone(&store),
        agent_handle.clone(),
        Arc::clone(&sense),
        shutdown.child_token(),
    );

    // Escalator.
    let stats = Arc::new(Mutex::new(EscalationStats::default()));
    let (analysis_tx, analysis_rx) = mpsc::channel(16);
    let rpc = config
        .openclaw_ws_url
        .clone()
        .map(|url| AgentRpc::connect(url, shutdown.child_token()));
    let hook = config
        .openclaw_hook_url
        .clone()
        .map(|url| HookClient::new(url, config.openclaw_hook_token.clone()));
    let tracker =
        Arc::new(Mutex::new(SpawnTracker::load(state_dir.join("pending-tasks.json"))));
    let escalator = Escalator {
        agent: agent_handle.clone(),
        feed: Arc::clone(&feed),
        hub: Arc::clone(&hub),
        traces: Arc::clone(&traces),
        rpc,
        hook,
        stats: Arc::clone(&stats),
        store: Arc::clone(&store),
        collector,
        tracker,
        session_key: config.openclaw_session_key.clone(),
        analysis_rx,
        cancel: shutdown.child_token(),
    };

    // Agent loop.
    let analyzer = config.agent_base_url.clone().map(Analyzer::new);
    let agent_loop = AgentLoop {
        handle: agent_handle.clone(),
        feed: Arc::clone(&feed),
        sense: Arc::clone(&sense),
        hub: Arc::clone(&hub),
        analyzer,
        analysis_tx,
        traces: Arc::clone(&traces),
        cancel: shutdown.child_token(),
    };

    // Audio wiring.
    let audio = AudioControl::new(
        &config,
        Arc::clone(&feed),
        Arc::clone(&hub),
        agent_handle.clone(),
        shutdown.child_token(),
    );
    audio::spawn_command_router(Arc::clone(&audio), Arc::clone(&hub), shutdown.child_token());

    // Shared HTTP/WS listener.
    let core = Arc::new(CoreState {
        config: config.clone(),
        epoch: epoch_token(),
        feed,
        sense,
        hub,
        agent: agent_handle,
        stats,
        traces,
        shutdown: shutdown.clone(),
    });
    let router = transport::build_router(Arc::clone(&core));
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        RunError::Startup(anyhow::Error::from(e).context(format!("binding {addr}")))
    })?;

    // Start the long-running subsystems, then serve.
    let escalator_task = tokio::spawn(escalator.run());
    let loop_task = tokio::spawn(agent_loop.run());
    if config.audio_auto_start && config.audio_capture_command.is_some() {
        audio.start();
    }

    tracing::info!(epoch = %core.epoch, "sinain-core listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(|e| RunError::Runtime(anyhow::Error::from(e)))?;

    // Reverse-order shutdown with a bounded join per task.
    shutdown.cancel();
    join_within(loop_task, "agent loop").await;
    audio.stop();
    join_within(escalator_task, "escalator").await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn join_within(task: JoinHandle<()>, name: &str) {
    if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
        tracing::warn!(task = name, "task did not stop within 2s");
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::warn!(err = %e, "SIGTERM handler unavailable");
                        let _ = tokio::signal::ctrl_c().await;
                        shutdown.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}
