//! Transfer-relayer payment client
//!
//! HTTP adapter over the payment collaborator that fronts the on-chain
//! token transfers. Chain mechanics stay behind the relayer.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::PaymentClient;
use crate::config::PaymentConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Deserialize)]
struct AmountResponse {
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RelayerPaymentClient {
    http: reqwest::Client,
    base_url: String,
    funder_address: String,
}

impl RelayerPaymentClient {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            funder_address: config.funder_address.clone(),
        })
    }

    async fn fetch_amount(&self, path: &str) -> Result<Decimal> {
        let response: AmountResponse = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.amount)
    }
}

#[async_trait]
impl PaymentClient for RelayerPaymentClient {
    async fn balance_of(&self, address: &str) -> Result<Decimal> {
        self.fetch_amount(&format!("/balance/{address}")).await
    }

    async fn allowance_of(&self, address: &str) -> Result<Decimal> {
        self.fetch_amount(&format!("/allowance/{address}")).await
    }

    #[instrument(skip(self))]
    async fn transfer_from(&self, address: &str, amount: Decimal) -> Result<String> {
        let response: TransferResponse = self
            .http
            .post(format!("{}/transfer", self.base_url))
            .json(&serde_json::json!({
                "from": address,
                "to": self.funder_address,
                "amount": amount,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.tx_hash {
            Some(tx_hash) => {
                debug!(%tx_hash, "funds transferred");
                Ok(tx_hash)
            }
            None => Err(EngineError::UpstreamUnavailable(
                response
                    .error
                    .unwrap_or_else(|| "transfer failed with no reason".to_string()),
            )),
        }
    }
}
