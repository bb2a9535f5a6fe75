// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP fallback for escalation delivery. Fire-and-forget: a 2xx is
//! success, the body is never parsed, 5xx is not retried.

use std::time::Duration;

/// Fallback request timeout.
const HOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the openclaw HTTP hook.
pub struct HookClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HookClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url: url.into(), token }
    }

    /// Deliver an escalation message via the hook.
    pub async fn notify(&self, message: &str, session_key: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "message": message,
            "name": "sinain-core",
            "sessionKey": session_key,
            "wakeMode": "now",
            "deliver": false,
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req.send().await?.error_for_status()?;
        Ok(())
    }
}
