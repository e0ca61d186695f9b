//! User-facing delivery of messages and rendered assets.
//!
//! The engine calls the notifier at well-defined lifecycle points but
//! never depends on delivery succeeding for correctness; failures are
//! logged and swallowed by the caller.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::types::AccountId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, account: AccountId, text: &str) -> Result<()>;

    /// Deliver a rendered asset by URL with a short caption.
    async fn send_video(&self, account: AccountId, url: &str, caption: &str) -> Result<()>;
}

/// Bot API notifier: `sendMessage` / `sendVideo` over HTTP.
pub struct BotApiNotifier {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BotApiNotifier {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("building notifier HTTP client")?;
        Ok(Self {
            http,
            base_url: config.bot_api_base.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
        })
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;

        if !resp.status().is_success() {
            return Err(anyhow!("{} returned {}", method, resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for BotApiNotifier {
    async fn send_message(&self, account: AccountId, text: &str) -> Result<()> {
        self.call("sendMessage", json!({ "chat_id": account, "text": text }))
            .await
    }

    async fn send_video(&self, account: AccountId, url: &str, caption: &str) -> Result<()> {
        self.call(
            "sendVideo",
            json!({ "chat_id": account, "video": url, "caption": caption }),
        )
        .await
    }
}

/// Log-only notifier for headless runs and wiring tests.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_message(&self, account: AccountId, text: &str) -> Result<()> {
        info!(account, text, "notify (null)");
        Ok(())
    }

    async fn send_video(&self, account: AccountId, url: &str, caption: &str) -> Result<()> {
        info!(account, url, caption, "notify video (null)");
        Ok(())
    }
}
