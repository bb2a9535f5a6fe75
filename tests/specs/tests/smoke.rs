// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `sinain-core` binary and
//! exercise the HTTP surface and the overlay WebSocket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use sinain_specs::CoreProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let core = CoreProcess::start()?;
    core.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/health", core.base_url())).await?.json().await?;

    assert_eq!(resp["ok"], true);
    assert!(resp["epoch"].is_string());
    assert_eq!(resp["messages"], 0);
    assert_eq!(resp["overlayClients"], 0);
    assert_eq!(resp["agent"]["enabled"], false);
    assert_eq!(resp["escalation"]["mode"], "selective");
    Ok(())
}

#[tokio::test]
async fn sense_admission_and_dedup() -> anyhow::Result<()> {
    let core = CoreProcess::start()?;
    core.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();
    let url = format!("{}/sense", core.base_url());
    let body = serde_json::json!({
        "type": "text",
        "ts": 1_000,
        "ocr": "fn main() {}",
        "meta": {"ssim": 0.4, "app": "code", "screen": 0}
    });

    let first: serde_json::Value =
        client.post(&url).json(&body).send().await?.json().await?;
    assert_eq!(first["ok"], true);
    assert!(first["id"].is_number());

    let repeat: serde_json::Value =
        client.post(&url).json(&body).send().await?.json().await?;
    assert_eq!(repeat["deduplicated"], true);

    let events: serde_json::Value = client.get(&url).send().await?.json().await?;
    assert_eq!(events["events"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn feed_roundtrip_and_stable_epoch() -> anyhow::Result<()> {
    let core = CoreProcess::start()?;
    core.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let posted: serde_json::Value = client
        .post(format!("{}/feed", core.base_url()))
        .json(&serde_json::json!({"text": "smoke note", "priority": "urgent"}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(posted["ok"], true);

    let feed: serde_json::Value =
        client.get(format!("{}/feed", core.base_url())).send().await?.json().await?;
    let messages = feed["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "smoke note");
    assert_eq!(messages[0]["priority"], "urgent");

    // The epoch token is process-wide and stable across responses.
    assert_eq!(posted["epoch"], feed["epoch"]);
    Ok(())
}

#[tokio::test]
async fn agent_config_runtime_update() -> anyhow::Result<()> {
    let core = CoreProcess::start()?;
    core.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();
    let url = format!("{}/agent/config", core.base_url());

    let updated: serde_json::Value = client
        .post(&url)
        .json(&serde_json::json!({"escalationMode": "rich", "debounceMs": 750}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(updated["config"]["escalationMode"], "rich");
    assert_eq!(updated["config"]["debounceMs"], 750);

    let fetched: serde_json::Value = client.get(&url).send().await?.json().await?;
    assert_eq!(fetched["config"]["escalationMode"], "rich");
    Ok(())
}

#[tokio::test]
async fn overlay_ws_syncs_status_then_streams_feed() -> anyhow::Result<()> {
    let core = CoreProcess::start()?;
    core.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(core.ws_url()).await?;

    // First frame is always the status sync.
    let status = next_json(&mut ws).await?;
    assert_eq!(status["type"], "status");
    assert_eq!(status["data"]["mode"], "selective");
    assert_eq!(status["data"]["audio"], "off");

    // Health now counts one overlay client.
    let health: serde_json::Value =
        reqwest::get(format!("{}/health", core.base_url())).await?.json().await?;
    assert_eq!(health["overlayClients"], 1);

    // A feed POST fans out to the connected client.
    let client = reqwest::Client::new();
    client
        .post(format!("{}/feed", core.base_url()))
        .json(&serde_json::json!({"text": "fan-out check"}))
        .send()
        .await?
        .error_for_status()?;

    let frame = next_json(&mut ws).await?;
    assert_eq!(frame["type"], "feed");
    assert_eq!(frame["data"]["text"], "fan-out check");
    assert_eq!(frame["data"]["priority"], "normal");

    // A pong frame is accepted without closing the connection.
    ws.send(Message::Text(r#"{"type":"pong","ts":1}"#.to_owned().into())).await?;
    client
        .post(format!("{}/feed", core.base_url()))
        .json(&serde_json::json!({"text": "still alive"}))
        .send()
        .await?
        .error_for_status()?;
    let frame = next_json(&mut ws).await?;
    assert_eq!(frame["data"]["text"], "still alive");
    Ok(())
}

#[tokio::test]
async fn config_update_pushes_status_frame() -> anyhow::Result<()> {
    let core = CoreProcess::start()?;
    core.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(core.ws_url()).await?;
    let _ = next_json(&mut ws).await?; // connect-time status

    reqwest::Client::new()
        .post(format!("{}/agent/config", core.base_url()))
        .json(&serde_json::json!({"escalationMode": "focus"}))
        .send()
        .await?
        .error_for_status()?;

    let frame = next_json(&mut ws).await?;
    assert_eq!(frame["type"], "status");
    assert_eq!(frame["data"]["mode"], "focus");
    Ok(())
}

async fn next_json<S>(ws: &mut S) -> anyhow::Result<serde_json::Value>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("no websocket frame within timeout");
        }
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("websocket read timed out"))?;
        match msg {
            Some(Ok(Message::Text(text))) => {
                return Ok(serde_json::from_str(text.as_str())?);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => anyhow::bail!("websocket closed"),
        }
    }
}
