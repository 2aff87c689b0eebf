//! Venue CLOB REST client
//!
//! Thin reqwest client over the venue's order endpoints with HMAC L2
//! authentication headers on every mutating call.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{VenueCancelAck, VenueClient, VenueOrderAck, VenuePlaceOrder};
use crate::config::VenueConfig;
use crate::error::{EngineError, Result};
use crate::signing::HmacAuth;

/// Request body for POST /order
#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    condition_id: &'a str,
    side: &'a str,
    outcome: &'a str,
    size: Decimal,
    price: Decimal,
}

/// Response from POST /order
#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    average_price: Option<Decimal>,
}

/// Response from DELETE /order
#[derive(Debug, Deserialize)]
struct CancelOrderResponse {
    #[serde(default)]
    canceled: Option<Vec<String>>,
    #[serde(default)]
    not_canceled: Option<Vec<NotCanceledOrder>>,
}

#[derive(Debug, Deserialize)]
struct NotCanceledOrder {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    reason: String,
}

pub struct ClobVenueClient {
    http: reqwest::Client,
    base_url: String,
    auth: HmacAuth,
}

impl ClobVenueClient {
    pub fn new(config: &VenueConfig, auth: HmacAuth) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl VenueClient for ClobVenueClient {
    #[instrument(skip(self, request), fields(condition_id = %request.condition_id))]
    async fn place_order(&self, request: &VenuePlaceOrder) -> Result<VenueOrderAck> {
        let body = PlaceOrderBody {
            condition_id: &request.condition_id,
            side: request.side.as_str(),
            outcome: request.outcome.as_str(),
            size: request.quantity,
            price: request.price,
        };
        let body_json = serde_json::to_string(&body)?;
        let headers = self.auth.headers("POST", "/order", &body_json)?;

        let response: CreateOrderResponse = self
            .http
            .post(self.url("/order"))
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_json)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.success == Some(false) {
            let message = response
                .error_msg
                .unwrap_or_else(|| "order rejected".to_string());
            return Err(EngineError::UpstreamUnavailable(message));
        }

        let order_id = response.order_id.ok_or_else(|| {
            EngineError::UpstreamUnavailable("venue returned no order id".to_string())
        })?;

        debug!(%order_id, status = ?response.status, "venue accepted order");
        Ok(VenueOrderAck {
            order_id,
            status: response.status.unwrap_or_else(|| "live".to_string()),
            average_price: response.average_price,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, venue_order_id: &str) -> Result<VenueCancelAck> {
        let body = serde_json::json!({ "orderID": venue_order_id }).to_string();
        let headers = self.auth.headers("DELETE", "/order", &body)?;

        let response: CancelOrderResponse = self
            .http
            .delete(self.url("/order"))
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let cancelled = response
            .canceled
            .as_deref()
            .is_some_and(|ids| ids.iter().any(|id| id == venue_order_id));

        if cancelled {
            return Ok(VenueCancelAck {
                success: true,
                message: None,
            });
        }

        let message = response
            .not_canceled
            .as_deref()
            .and_then(|entries| entries.iter().find(|e| e.order_id == venue_order_id))
            .map(|e| e.reason.clone());
        warn!(%venue_order_id, ?message, "venue did not cancel order");

        Ok(VenueCancelAck {
            success: false,
            message,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self.http.get(self.url("/ok")).send().await?;
        Ok(response.status().is_success())
    }
}
