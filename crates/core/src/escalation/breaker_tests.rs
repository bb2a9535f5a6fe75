// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn five_consecutive_failures_open() {
    let mut breaker = CircuitBreaker::new();
    for n in 0..4u64 {
        assert!(!breaker.record_failure(1_000 + n));
        assert!(breaker.allow(1_000 + n));
    }
    assert!(breaker.record_failure(1_004));
    assert!(breaker.is_open(1_005));
    assert!(!breaker.allow(1_005));
}

#[test]
fn slow_failures_never_accumulate() {
    let mut breaker = CircuitBreaker::new();
    // Each failure lands outside the 120 s window of the previous run.
    for n in 0..10u64 {
        assert!(!breaker.record_failure(n * 200_000));
    }
    assert!(breaker.allow(10 * 200_000));
}

#[test]
fn success_resets_the_run() {
    let mut breaker = CircuitBreaker::new();
    for n in 0..4u64 {
        breaker.record_failure(1_000 + n);
    }
    breaker.record_success();
    assert!(!breaker.record_failure(1_010));
    assert!(breaker.allow(1_011));
}

#[test]
fn no_attempt_until_open_window_elapses() {
    let mut breaker = CircuitBreaker::new();
    for n in 0..5u64 {
        breaker.record_failure(1_000 + n);
    }
    // Once opened, nothing passes until the window elapses.
    assert!(!breaker.allow(1_004 + 299_000));
    assert!(breaker.allow(1_004 + 301_000));
}

#[test]
fn half_open_allows_exactly_one_probe() {
    let mut breaker = CircuitBreaker::new();
    for n in 0..5u64 {
        breaker.record_failure(n);
    }
    let after = 400_000;
    assert!(breaker.allow(after));
    // Probe in flight: nothing else passes.
    assert!(!breaker.allow(after + 1));

    breaker.record_success();
    assert!(breaker.allow(after + 2));
}

#[test]
fn failed_probe_reopens() {
    let mut breaker = CircuitBreaker::new();
    for n in 0..5u64 {
        breaker.record_failure(n);
    }
    let after = 400_000;
    assert!(breaker.allow(after));
    assert!(breaker.record_failure(after));
    assert!(breaker.is_open(after + 1));
    assert!(!breaker.allow(after + OPEN_MS - 1));
    assert!(breaker.allow(after + OPEN_MS));
}
