//! HTTP client for the relay's `/ask` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// How long the bridge waits for the relay before giving up.
pub const ASK_TIMEOUT: Duration = Duration::from_secs(60);

/// What the relay said, reduced to what the bridge acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// 200 with a non-empty `reply` (or `message`).
    Reply(String),
    /// 200 without any reply text, e.g. a multi-provider answer.
    Empty,
    /// Any non-200 status.
    Status(u16),
}

#[derive(Debug, Default, Deserialize)]
struct AskResponse {
    reply: Option<String>,
    message: Option<String>,
}

pub struct RelayClient {
    http: reqwest::Client,
    url: String,
    provider: String,
}

impl RelayClient {
    pub fn new(url: &str, provider: &str) -> Result<Self> {
        Self::with_timeout(url, provider, ASK_TIMEOUT)
    }

    pub fn with_timeout(url: &str, provider: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
            provider: provider.to_string(),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Ask on behalf of `session_id`. Transport and decode failures are
    /// errors; HTTP status problems are an outcome.
    pub async fn ask(&self, session_id: &str, query: &str) -> Result<RelayOutcome> {
        tracing::debug!(session_id, provider = %self.provider, "Sending query to relay");
        let resp = self
            .http
            .post(&self.url)
            .form(&[
                ("session_id", session_id),
                ("provider", self.provider.as_str()),
                ("query", query),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "Relay returned an error status");
            return Ok(RelayOutcome::Status(status.as_u16()));
        }

        let body: AskResponse = resp.json().await?;
        let text = body
            .reply
            .filter(|r| !r.is_empty())
            .or(body.message)
            .unwrap_or_default();
        if text.is_empty() {
            Ok(RelayOutcome::Empty)
        } else {
            Ok(RelayOutcome::Reply(text))
        }
    }
}
