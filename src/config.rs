//! Process configuration: credentials and endpoints from flags or the
//! environment, and construction of the production collaborators.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::{
    BybitClient, BybitCredentials, ExchangeRateConverter, LogNotifier, MailgunClient, Notifier,
    RateLimitedNotifier, TelegramNotifier,
};
use crate::db::ExecutionJournal;
use crate::models::InstanceSpec;
use crate::trading::{EngineSettings, RateLimiter, Services};

/// Exchange, inbox, chat and exchange-rate settings.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Bybit API key (private endpoints)
    #[arg(long, env = "BYBIT_API_KEY", hide_env_values = true)]
    pub bybit_api_key: Option<String>,

    /// Bybit API secret
    #[arg(long, env = "BYBIT_API_SECRET", hide_env_values = true)]
    pub bybit_api_secret: Option<String>,

    /// Bybit REST base URL
    #[arg(long, env = "BYBIT_BASE_URL", default_value = crate::api::BYBIT_URL)]
    pub bybit_base_url: String,

    /// Receive window for signed Bybit requests, in milliseconds
    #[arg(long, env = "BYBIT_RECV_WINDOW", default_value = "60000")]
    pub bybit_recv_window: u64,

    /// Mailgun API key used to read stored signal mails
    #[arg(long, env = "MAILGUN_API_KEY", hide_env_values = true)]
    pub mailgun_api_key: Option<String>,

    /// Mailgun receiving domain
    #[arg(long, env = "MAILGUN_DOMAIN")]
    pub mailgun_domain: Option<String>,

    /// Mailgun REST base URL
    #[arg(long, env = "MAILGUN_BASE_URL", default_value = crate::api::MAILGUN_URL)]
    pub mailgun_base_url: String,

    /// Telegram bot token; notifications go to the log when unset
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat receiving notifications
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// exchangerate-api.com key for USD/RUB conversion
    #[arg(long, env = "EXCHANGE_RATE_API_KEY", hide_env_values = true)]
    pub exchange_rate_api_key: Option<String>,
}

/// Polling and accounting overrides.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Seconds between signal polls
    #[arg(long, default_value = "1")]
    pub signal_interval: u64,

    /// Seconds between stop-loss / take-profit checks
    #[arg(long, default_value = "10")]
    pub risk_interval: u64,

    /// Maximum outbound calls per second per call kind
    #[arg(long, default_value = "5")]
    pub rate_limit: u32,

    /// Exchange fee per order as a fraction
    #[arg(long, default_value = "0.001")]
    pub fee_rate: Decimal,
}

impl EngineArgs {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            signal_poll_interval: Duration::from_secs(self.signal_interval),
            risk_poll_interval: Duration::from_secs(self.risk_interval),
            calls_per_second: self.rate_limit,
            fee_rate: self.fee_rate,
            ..EngineSettings::default()
        }
    }
}

impl ServiceArgs {
    fn bybit_credentials(&self) -> Option<BybitCredentials> {
        match (&self.bybit_api_key, &self.bybit_api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(BybitCredentials {
                    api_key: key.clone(),
                    api_secret: secret.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn bybit(&self) -> Result<BybitClient> {
        let credentials = self.bybit_credentials();
        if credentials.is_none() {
            warn!("Bybit credentials not configured; Real mode is unavailable");
        }
        BybitClient::with_base_url(self.bybit_base_url.clone(), credentials, self.bybit_recv_window)
    }

    pub fn mailgun(&self) -> Result<MailgunClient> {
        let api_key = self
            .mailgun_api_key
            .clone()
            .context("MAILGUN_API_KEY is required to read signals")?;
        let domain = self
            .mailgun_domain
            .clone()
            .context("MAILGUN_DOMAIN is required to read signals")?;
        MailgunClient::with_base_url(self.mailgun_base_url.clone(), domain, api_key)
    }

    /// Telegram when configured, the log otherwise; throttled process-wide.
    pub fn notifier(&self, calls_per_second: u32) -> Result<Arc<dyn Notifier>> {
        let inner: Arc<dyn Notifier> = match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat_id)) => {
                info!(chat_id = %chat_id, "Notifications go to Telegram");
                Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone())?)
            }
            _ => {
                info!("Telegram not configured; notifications go to the log");
                Arc::new(LogNotifier)
            }
        };

        Ok(Arc::new(RateLimitedNotifier::new(
            inner,
            RateLimiter::per_second("notify", calls_per_second),
        )))
    }

    pub fn converter(&self) -> Result<ExchangeRateConverter> {
        ExchangeRateConverter::new(self.exchange_rate_api_key.clone())
    }

    /// Production collaborators for a registry.
    pub fn services(
        &self,
        settings: &EngineSettings,
        journal: Arc<dyn ExecutionJournal>,
    ) -> Result<Services> {
        Ok(Services {
            gateway: Arc::new(self.bybit()?),
            source: Arc::new(self.mailgun()?),
            notifier: self.notifier(settings.calls_per_second)?,
            journal,
            converter: Arc::new(self.converter()?),
        })
    }
}

/// Read a JSON array of instance requests.
pub fn load_instance_specs(path: &Path) -> Result<Vec<InstanceSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read instances file {}", path.display()))?;
    parse_instance_specs(&raw).with_context(|| format!("Invalid instances file {}", path.display()))
}

fn parse_instance_specs(raw: &str) -> Result<Vec<InstanceSpec>> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rust_decimal_macros::dec;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        services: ServiceArgs,
        #[command(flatten)]
        engine: EngineArgs,
    }

    #[test]
    fn test_parse_instance_specs() {
        let raw = r#"[
            {"name": "alpha", "symbol": "BTCUSDT", "amount": "0.001", "mode": "Simulation",
             "take_profit_percent": "5", "stop_loss_percent": "2", "listener": "alpha"},
            {"name": "beta", "symbol": "ethusdt", "amount": 0.05, "mode": "Real", "listener": "beta"}
        ]"#;

        let specs = parse_instance_specs(raw).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].take_profit_percent, dec!(5));
        assert_eq!(specs[1].amount, dec!(0.05));
        assert_eq!(specs[1].stop_loss_percent, Decimal::ZERO);
    }

    #[test]
    fn test_engine_args_defaults() {
        let cli = TestCli::try_parse_from(["test", "--risk-interval", "30"]).unwrap();
        let settings = cli.engine.settings();
        assert_eq!(settings.signal_poll_interval, Duration::from_secs(1));
        assert_eq!(settings.risk_poll_interval, Duration::from_secs(30));
        assert_eq!(settings.fee_rate, dec!(0.001));
        assert_eq!(settings.recent_signals_limit, 20);
    }

    #[test]
    fn test_credentials_need_both_halves() {
        let cli = TestCli::try_parse_from(["test", "--bybit-api-key", "key"]).unwrap();
        let mut services = cli.services;
        services.bybit_api_secret = None;
        assert!(services.bybit_credentials().is_none());

        services.bybit_api_secret = Some("secret".to_string());
        assert!(services.bybit_credentials().is_some());
    }
}
