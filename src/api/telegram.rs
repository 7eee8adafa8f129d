//! Chat notifications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info};

use crate::trading::RateLimiter;

use super::types::TelegramMessage;
use super::Notifier;

pub const TELEGRAM_URL: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends Markdown messages to a single Telegram chat.
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: TELEGRAM_URL.to_string(),
            bot_token,
            chat_id,
        })
    }

    async fn post(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Telegram")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sendMessage failed: {} - {}", status, body);
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        match self.post(text).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to send Telegram message");
                false
            }
        }
    }
}

/// Notifier used when no chat is configured: messages go to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> bool {
        info!(target: "notify", "{}", text);
        true
    }
}

/// Shares one call budget across every sender of a notifier.
pub struct RateLimitedNotifier {
    inner: Arc<dyn Notifier>,
    limiter: RateLimiter,
}

impl RateLimitedNotifier {
    pub fn new(inner: Arc<dyn Notifier>, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl Notifier for RateLimitedNotifier {
    async fn send(&self, text: &str) -> bool {
        self.limiter.acquire().await;
        self.inner.send(text).await
    }
}
