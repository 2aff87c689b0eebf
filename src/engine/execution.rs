//! Order execution strategies
//!
//! Two interchangeable executors selected by configuration: a simulated
//! fill for development and dry runs, and the real path through the payment
//! collaborator and the venue trading client. Every rejected execution
//! carries a short, user-safe reason; internals never leak into it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ExecutionConfig, ExecutionMode};
use crate::domain::{Market, Order, OrderType, Side};
use crate::error::{EngineError, Result};
use crate::venue::{PaymentClient, VenueClient, VenuePlaceOrder};

const VENUE_UNAVAILABLE: &str =
    "The trading venue is temporarily unavailable. Please try again shortly.";

/// Outcome of one execution attempt
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Filled {
        fill_price: Decimal,
        external_order_id: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

impl ExecutionResult {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Execution strategy seam
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, order: &Order, market: &Market) -> Result<ExecutionResult>;
}

/// Build the configured executor. Real execution requires both venue
/// collaborators.
pub fn build_executor(
    config: &ExecutionConfig,
    venue: Option<Arc<dyn VenueClient>>,
    payment: Option<Arc<dyn PaymentClient>>,
    fallback_min_order_value: Option<Decimal>,
) -> Result<Arc<dyn Executor>> {
    match config.mode {
        ExecutionMode::Simulated => Ok(Arc::new(SimulatedExecutor::new(config.clone()))),
        ExecutionMode::Real => {
            let venue = venue.ok_or_else(|| {
                EngineError::Validation("real execution requires a venue client".to_string())
            })?;
            let payment = payment.ok_or_else(|| {
                EngineError::Validation("real execution requires a payment client".to_string())
            })?;
            Ok(Arc::new(RealExecutor::new(
                venue,
                payment,
                fallback_min_order_value,
            )))
        }
    }
}

/// Does the current market price violate the order's limit?
pub fn limit_violation(side: Side, limit: Decimal, market_price: Decimal) -> Option<String> {
    match side {
        Side::Buy if market_price > limit => Some(format!(
            "Market price {market_price} exceeds the limit price {limit}."
        )),
        Side::Sell if market_price < limit => Some(format!(
            "Market price {market_price} is below the limit price {limit}."
        )),
        _ => None,
    }
}

/// Simulated execution: a little latency, a configured failure fraction,
/// fills at the market price (or the limit price when it holds).
pub struct SimulatedExecutor {
    config: ExecutionConfig,
}

impl SimulatedExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, order: &Order, market: &Market) -> Result<ExecutionResult> {
        use rand::Rng;

        let (latency_ms, roll) = {
            let mut rng = rand::thread_rng();
            let latency = rng
                .gen_range(self.config.sim_latency_min_ms..=self.config.sim_latency_max_ms.max(self.config.sim_latency_min_ms));
            (latency, rng.gen::<f64>())
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if roll < self.config.sim_failure_rate {
            return Ok(ExecutionResult::rejected(
                "Insufficient liquidity to fill this order.",
            ));
        }

        let market_price = market.price_for(order.outcome);
        match order.order_type {
            OrderType::Market => Ok(ExecutionResult::Filled {
                fill_price: market_price,
                external_order_id: None,
            }),
            OrderType::Limit => {
                let limit = order.price.ok_or_else(|| {
                    EngineError::Internal(format!("limit order {} has no price", order.id))
                })?;
                match limit_violation(order.side, limit, market_price) {
                    Some(reason) => Ok(ExecutionResult::rejected(reason)),
                    None => Ok(ExecutionResult::Filled {
                        fill_price: limit,
                        external_order_id: None,
                    }),
                }
            }
        }
    }
}

/// Real execution through the venue
pub struct RealExecutor {
    venue: Arc<dyn VenueClient>,
    payment: Arc<dyn PaymentClient>,
    fallback_min_order_value: Option<Decimal>,
}

impl RealExecutor {
    pub fn new(
        venue: Arc<dyn VenueClient>,
        payment: Arc<dyn PaymentClient>,
        fallback_min_order_value: Option<Decimal>,
    ) -> Self {
        Self {
            venue,
            payment,
            fallback_min_order_value,
        }
    }

    /// Translate a raw venue error into a distinct, non-leaking, actionable
    /// message.
    fn map_venue_error(raw: &str) -> String {
        let lowered = raw.to_lowercase();
        if lowered.contains("balance") {
            "Insufficient balance to cover this order.".to_string()
        } else if lowered.contains("allowance") {
            "Token allowance is too low. Approve a higher allowance and try again.".to_string()
        } else if lowered.contains("price") || lowered.contains("range") {
            "Order price is outside the allowed range for this market.".to_string()
        } else if lowered.contains("auth") || lowered.contains("api key") {
            "The venue rejected the gateway credentials. Please try again later.".to_string()
        } else if lowered.contains("not found") {
            "This market is no longer available on the venue.".to_string()
        } else {
            "The venue rejected this order.".to_string()
        }
    }
}

#[async_trait]
impl Executor for RealExecutor {
    async fn execute(&self, order: &Order, market: &Market) -> Result<ExecutionResult> {
        let Some(condition_id) = market.external_condition_id.clone() else {
            return Ok(ExecutionResult::rejected(
                "This market is not tradable on the venue.",
            ));
        };

        match self.venue.health_check().await {
            Ok(true) => {}
            Ok(false) => return Ok(ExecutionResult::rejected(VENUE_UNAVAILABLE)),
            Err(e) => {
                warn!(order_id = %order.id, "venue health check failed: {e}");
                return Ok(ExecutionResult::rejected(VENUE_UNAVAILABLE));
            }
        }

        let price_basis = order
            .price
            .unwrap_or_else(|| market.price_for(order.outcome));
        let notional = order.quantity * price_basis;

        // Undersized orders are rejected outright rather than silently
        // inflated to the venue floor.
        if let Some(floor) = market.min_order_value.or(self.fallback_min_order_value) {
            if notional < floor {
                return Ok(ExecutionResult::rejected(format!(
                    "Order value is below the venue minimum of ${floor}."
                )));
            }
        }

        if let Some(wallet) = &order.user_wallet_address {
            let balance = match self.payment.balance_of(wallet).await {
                Ok(balance) => balance,
                Err(e) => {
                    warn!(order_id = %order.id, "balance lookup failed: {e}");
                    return Ok(ExecutionResult::rejected(
                        "Could not verify the wallet balance. Please try again later.",
                    ));
                }
            };
            if balance < notional {
                return Ok(ExecutionResult::rejected(
                    "Insufficient balance to cover this order.",
                ));
            }

            let allowance = match self.payment.allowance_of(wallet).await {
                Ok(allowance) => allowance,
                Err(e) => {
                    warn!(order_id = %order.id, "allowance lookup failed: {e}");
                    return Ok(ExecutionResult::rejected(
                        "Could not verify the token allowance. Please try again later.",
                    ));
                }
            };
            if allowance < notional {
                return Ok(ExecutionResult::rejected(
                    "Token allowance is too low. Approve a higher allowance and try again.",
                ));
            }

            match self.payment.transfer_from(wallet, notional).await {
                Ok(tx_hash) => debug!(order_id = %order.id, %tx_hash, "funds transferred"),
                Err(e) => {
                    warn!(order_id = %order.id, "funds transfer failed: {e}");
                    return Ok(ExecutionResult::rejected(
                        "Funds transfer failed; the order was not placed.",
                    ));
                }
            }
        }

        let request = VenuePlaceOrder {
            condition_id,
            side: order.side,
            outcome: order.outcome,
            quantity: order.quantity,
            price: price_basis,
        };

        let ack = match self.venue.place_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(order_id = %order.id, "venue rejected order: {e}");
                return Ok(ExecutionResult::rejected(Self::map_venue_error(
                    &e.to_string(),
                )));
            }
        };

        debug!(order_id = %order.id, venue_order_id = %ack.order_id, status = %ack.status, "venue accepted order");
        Ok(ExecutionResult::Filled {
            fill_price: ack.average_price.unwrap_or(price_basis),
            external_order_id: Some(ack.order_id),
        })
    }
}
