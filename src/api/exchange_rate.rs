//! USD to RUB conversion with a fixed fallback rate.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info};

use super::types::ExchangeRateResponse;
use super::CurrencyConverter;

pub const EXCHANGE_RATE_URL: &str = "https://v6.exchangerate-api.com";

/// Rate used whenever the live lookup fails.
pub const FALLBACK_USD_RUB: Decimal = dec!(75.0);

/// Converter backed by exchangerate-api.com.
pub struct ExchangeRateConverter {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExchangeRateConverter {
    /// Without an API key every conversion uses the fallback rate.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: EXCHANGE_RATE_URL.to_string(),
            api_key,
        })
    }

    async fn fetch_rate(&self) -> Result<Decimal> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("exchange rate API key not configured"))?;
        let url = format!("{}/v6/{}/latest/USD", self.base_url, key);

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(3)),
            ..Default::default()
        };

        let url = &url;
        let body: ExchangeRateResponse = retry(policy, || async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!(e)))?;
            if !response.status().is_success() {
                return Err(backoff::Error::permanent(anyhow!(
                    "API returned status code {}",
                    response.status()
                )));
            }
            response
                .json()
                .await
                .map_err(|e| backoff::Error::permanent(anyhow!(e)))
        })
        .await?;

        let rate = body
            .conversion_rates
            .get("RUB")
            .copied()
            .ok_or_else(|| anyhow!("RUB rate missing from response"))?;

        Decimal::try_from(rate).context("Invalid RUB rate")
    }
}

#[async_trait]
impl CurrencyConverter for ExchangeRateConverter {
    async fn usd_to_rub(&self, amount: Decimal) -> Decimal {
        if amount <= Decimal::ZERO {
            error!(amount = %amount, "Invalid amount for conversion");
            return Decimal::ZERO;
        }

        match self.fetch_rate().await {
            Ok(rate) => amount * rate,
            Err(e) => {
                error!(error = %e, "Error fetching exchange rate data");
                info!(rate = %FALLBACK_USD_RUB, "Using fallback conversion rate");
                amount * FALLBACK_USD_RUB
            }
        }
    }
}
