// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Analysis model client: one-shot chat completion against an
//! OpenAI-compatible endpoint (local or remote).

use anyhow::Context;
use serde_json::Value;

/// Hard budget for a single analysis call.
pub const ANALYSIS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// HTTP client for the analysis model.
pub struct Analyzer {
    client: reqwest::Client,
    base_url: String,
}

impl Analyzer {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ANALYSIS_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, base_url: base_url.into().trim_end_matches('/').to_owned() }
    }

    /// Run one analysis and return the raw model text. The caller applies
    /// its own overall timeout and envelope parsing.
    pub async fn analyze(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });
        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = resp.json().await?;
        let content = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .context("completion missing choices[0].message.content")?;
        Ok(content.to_owned())
    }
}
