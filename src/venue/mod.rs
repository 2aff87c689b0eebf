//! External venue collaborators
//!
//! The engine consumes the venue through two narrow contracts: the trading
//! client (place/cancel/health) and the payment collaborator
//! (balance/allowance/transfer). Their internal correctness is not this
//! crate's concern.

pub mod clob;
pub mod payment;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Outcome, Side};
use crate::error::Result;

pub use clob::ClobVenueClient;
pub use payment::RelayerPaymentClient;

/// Order placement request sent to the venue
#[derive(Debug, Clone)]
pub struct VenuePlaceOrder {
    /// Venue condition id of the market
    pub condition_id: String,
    pub side: Side,
    pub outcome: Outcome,
    pub quantity: Decimal,
    /// Limit price, or the engine's price basis for market orders
    pub price: Decimal,
}

/// Venue acknowledgement of a placed order
#[derive(Debug, Clone)]
pub struct VenueOrderAck {
    pub order_id: String,
    pub status: String,
    pub average_price: Option<Decimal>,
}

/// Venue acknowledgement of a cancel request
#[derive(Debug, Clone)]
pub struct VenueCancelAck {
    pub success: bool,
    pub message: Option<String>,
}

/// Venue trading client (real-execution only)
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn place_order(&self, request: &VenuePlaceOrder) -> Result<VenueOrderAck>;

    async fn cancel_order(&self, venue_order_id: &str) -> Result<VenueCancelAck>;

    async fn health_check(&self) -> Result<bool>;
}

/// Payment collaborator moving user funds to the funder address before a
/// real order is placed (real-execution only)
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn balance_of(&self, address: &str) -> Result<Decimal>;

    async fn allowance_of(&self, address: &str) -> Result<Decimal>;

    /// Transfer `amount` from `address` to the funder. Returns the
    /// transaction hash.
    async fn transfer_from(&self, address: &str, amount: Decimal) -> Result<String>;
}
