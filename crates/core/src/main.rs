// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use sinain_core::config::CoreConfig;

#[tokio::main]
async fn main() {
    let config = CoreConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // reqwest is built with rustls-no-provider; install the ring provider
    // once before any TLS use.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = sinain_core::run(config).await {
        error!("fatal: {e}");
        std::process::exit(e.exit_code());
    }
}
