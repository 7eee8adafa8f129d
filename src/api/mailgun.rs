//! Mailgun events API as a signal source.
//!
//! Signals arrive as e-mails to `{listener}@{domain}` and are kept by
//! Mailgun's "store" action; the newest stored message is the current signal.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use tracing::debug;

use crate::models::SignalRecord;

use super::types::*;
use super::SignalSource;

pub const MAILGUN_URL: &str = "https://api.mailgun.net";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only client for stored inbound messages.
pub struct MailgunClient {
    http: Client,
    base_url: String,
    domain: String,
    api_key: String,
}

impl MailgunClient {
    pub fn with_base_url(base_url: String, domain: String, api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            domain,
            api_key,
        })
    }

    fn recipient(&self, listener: &str) -> String {
        format!("{}@{}", listener, self.domain)
    }

    /// Newest-first stored events addressed to `listener`.
    async fn stored_events(&self, listener: &str, limit: u32) -> Result<Vec<MailgunEvent>> {
        let url = format!("{}/v3/{}/events", self.base_url, self.domain);
        let recipient = self.recipient(listener);
        let limit = limit.clamp(1, 300).to_string();

        debug!(url = %url, recipient = %recipient, "Fetching stored events");

        let response = self
            .http
            .get(&url)
            .basic_auth("api", Some(&self.api_key))
            .query(&[
                ("event", "stored"),
                ("ascending", "no"),
                ("recipients", recipient.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch events")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Events request failed: {} - {}", status, body);
        }

        let events: MailgunEvents = response
            .json()
            .await
            .context("Failed to parse events response")?;

        Ok(events.items)
    }

    /// Plain-text body of a stored message.
    async fn message_body(&self, storage: &MailgunStorage) -> Result<Option<String>> {
        let url = if storage.url.is_empty() {
            format!("{}/v3/domains/{}/messages/{}", self.base_url, self.domain, storage.key)
        } else {
            storage.url.clone()
        };

        let response = self
            .http
            .get(&url)
            .basic_auth("api", Some(&self.api_key))
            .send()
            .await
            .context("Failed to fetch stored message")?;

        if !response.status().is_success() {
            let status = response.status();
            bail!("Stored message request failed: {}", status);
        }

        let message: StoredMessage = response
            .json()
            .await
            .context("Failed to parse stored message")?;

        Ok(message.body_plain)
    }
}

#[async_trait]
impl SignalSource for MailgunClient {
    async fn latest_signal(&self, listener: &str) -> Result<Option<String>> {
        let events = self.stored_events(listener, 1).await?;

        match events.into_iter().find_map(|e| e.storage) {
            Some(storage) => self.message_body(&storage).await,
            None => Ok(None),
        }
    }

    async fn recent_signals(&self, listener: &str, limit: u32) -> Result<Vec<SignalRecord>> {
        let events = self.stored_events(listener, limit).await?;
        let mut records = Vec::with_capacity(events.len());

        for event in events {
            let Some(storage) = event.storage else {
                continue;
            };
            let Some(text) = self.message_body(&storage).await? else {
                continue;
            };

            let secs = event.timestamp.trunc() as i64;
            let nanos = (event.timestamp.fract() * 1e9) as u32;
            let received_at = Utc
                .timestamp_opt(secs, nanos)
                .single()
                .unwrap_or_else(Utc::now);

            records.push(SignalRecord { text, received_at });
        }

        Ok(records)
    }
}
