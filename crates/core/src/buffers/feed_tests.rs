// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn push_assigns_monotonic_ids() {
    let ring = FeedRing::new(10);
    let a = ring.push("one", Priority::Normal, Source::System, Channel::Stream);
    let b = ring.push("two", Priority::High, Source::Audio, Channel::Stream);
    assert!(b.id > a.id);
}

#[test]
fn query_after_id_returns_newer_only() {
    let ring = FeedRing::new(10);
    let first = ring.push("one", Priority::Normal, Source::System, Channel::Stream);
    ring.push("two", Priority::Normal, Source::System, Channel::Stream);
    ring.push("three", Priority::Normal, Source::System, Channel::Stream);

    let newer = ring.query(first.id);
    assert_eq!(newer.len(), 2);
    assert_eq!(newer[0].text, "two");
    assert_eq!(newer[1].text, "three");
}

#[test]
fn eviction_drops_oldest_whole() {
    let ring = FeedRing::new(3);
    for n in 0..5 {
        ring.push(format!("m{n}"), Priority::Normal, Source::System, Channel::Stream);
    }
    let all = ring.query(0);
    assert_eq!(all.len(), 3);
    let texts: Vec<&str> = all.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, ["m2", "m3", "m4"]);
    // Ids keep climbing even after eviction.
    assert_eq!(all[2].id, 5);
}

#[test]
fn query_by_source_filters() {
    let ring = FeedRing::new(10);
    ring.push("speech", Priority::Normal, Source::Audio, Channel::Stream);
    ring.push("notice", Priority::Normal, Source::System, Channel::Stream);
    ring.push("more speech", Priority::Normal, Source::Audio, Channel::Stream);

    let audio = ring.query_by_source(Source::Audio, 0);
    assert_eq!(audio.len(), 2);
    assert!(audio.iter().all(|i| i.source == Source::Audio));
}

#[test]
fn priority_total_order() {
    assert!(Priority::Urgent > Priority::High);
    assert!(Priority::High > Priority::Normal);
}

#[test]
fn wire_format_is_lowercase() {
    let item = FeedRing::new(2).push("x", Priority::Urgent, Source::Openclaw, Channel::Agent);
    let json = serde_json::to_value(&item).unwrap_or_default();
    assert_eq!(json["priority"], "urgent");
    assert_eq!(json["source"], "openclaw");
    assert_eq!(json["channel"], "agent");
}
