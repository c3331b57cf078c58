//! Chat notifications via webhook
//!
//! Operational events (update-bot failures, monitoring holds) are pushed to
//! a chat room through a hookshot-style webhook. Without a configured URL
//! every notification is a logged no-op, so the engines can call this
//! unconditionally.

use crate::error::{Error, Result};
use tracing::{debug, warn};
use url::Url;

/// Webhook notifier; messages are plain text
pub struct Notifier {
    webhook: Option<Url>,
    client: reqwest::Client,
}

impl Notifier {
    /// Notifier for `webhook`; `None` disables delivery
    pub fn new(webhook: Option<Url>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fc-release-tools")
            .build()
            .map_err(|e| Error::Forge(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { webhook, client })
    }

    /// Deliver `text` to the webhook
    pub async fn send(&self, text: &str) -> Result<()> {
        let Some(url) = &self.webhook else {
            debug!(text, "chat webhook not configured, skipping notification");
            return Ok(());
        };
        let response = self
            .client
            .put(url.clone())
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::GatewayUnavailable(format!(
                "chat webhook returned {}",
                response.status()
            )));
        }
        debug!("chat notification delivered");
        Ok(())
    }

    /// Best-effort delivery; failures are logged and swallowed so a chat
    /// outage never fails the operation that triggered the notification
    pub async fn try_send(&self, text: &str) {
        if let Err(error) = self.send(text).await {
            warn!(%error, "failed to deliver chat notification");
        }
    }
}
