// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::CoreConfig;
use crate::config::EscalationMode;

fn parse(args: &[&str]) -> CoreConfig {
    let mut argv = vec!["sinain-core"];
    argv.extend_from_slice(args);
    match CoreConfig::try_parse_from(argv) {
        Ok(config) => config,
        Err(e) => panic!("parse failed: {e}"),
    }
}

#[test]
fn defaults() {
    let config = parse(&[]);
    assert_eq!(config.port, 9500);
    assert_eq!(config.escalation_mode, EscalationMode::Selective);
    assert_eq!(config.escalation_cooldown_ms, 30_000);
    assert_eq!(config.feedback_retention_days, 30);
    assert!(config.agent_base_url.is_none());
}

#[test]
fn agent_config_disabled_without_base_url() {
    let config = parse(&[]);
    assert!(!config.agent_config().enabled);

    let config = parse(&["--agent-base-url", "http://127.0.0.1:11434"]);
    assert!(config.agent_config().enabled);
}

#[test]
fn cooldown_floor_applied() {
    let config = parse(&["--escalation-cooldown-ms", "100"]);
    assert_eq!(config.agent_config().escalation_cooldown_ms, 5_000);
}

#[test]
fn escalation_mode_parses_all_variants() {
    for (raw, want) in [
        ("off", EscalationMode::Off),
        ("selective", EscalationMode::Selective),
        ("focus", EscalationMode::Focus),
        ("rich", EscalationMode::Rich),
    ] {
        let config = parse(&["--escalation-mode", raw]);
        assert_eq!(config.escalation_mode, want);
    }
}

#[test]
fn max_interval_never_below_min() {
    let config =
        parse(&["--agent-min-interval-ms", "20000", "--agent-max-interval-ms", "1000"]);
    assert_eq!(config.agent_config().max_interval_ms, 20_000);
}
