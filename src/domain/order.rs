use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Venue share-lot precision. Quantities derived from a notional dollar
/// amount are rounded down to this many decimal places.
pub const SHARE_DECIMALS: u32 = 2;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn try_from_str(raw: &str) -> Option<Self> {
        match raw {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }

    pub fn try_from_str(raw: &str) -> Option<Self> {
        match raw {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary market outcome the order trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }

    pub fn try_from_str(raw: &str) -> Option<Self> {
        match raw {
            "YES" => Some(Outcome::Yes),
            "NO" => Some(Outcome::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order persisted but not yet handed to the queue
    Pending,
    /// Queue job exists for this order
    Queued,
    /// A worker is executing this order
    Processing,
    /// Order fully filled
    Filled,
    /// Order partially filled; no further automatic retry
    PartiallyFilled,
    /// Order failed
    Failed,
    /// Order cancelled
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Queued => "QUEUED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn try_from_str(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(OrderStatus::Pending),
            "QUEUED" => Some(OrderStatus::Queued),
            "PROCESSING" => Some(OrderStatus::Processing),
            "FILLED" => Some(OrderStatus::Filled),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FAILED" => Some(OrderStatus::Failed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::PartiallyFilled
                | OrderStatus::Failed
                | OrderStatus::Cancelled
        )
    }

    /// A queue delivery may act on the order only from these states.
    /// Anything else makes redelivery of an at-least-once job a no-op.
    pub fn is_processable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Queued)
    }

    /// Cancellable from PENDING/QUEUED always; from PROCESSING only once a
    /// venue order id exists (a live venue order can still be cancelled,
    /// a mid-flight execution without one cannot).
    pub fn is_cancellable(&self, has_external_order_id: bool) -> bool {
        match self {
            OrderStatus::Pending | OrderStatus::Queued => true,
            OrderStatus::Processing => has_external_order_id,
            _ => false,
        }
    }

    /// Legal state-machine edges. Everything not listed is rejected.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Processing)
                | (Pending, Cancelled)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Filled)
                | (Processing, PartiallyFilled)
                | (Processing, Failed)
                | (Processing, Cancelled)
        ) || matches!((self, to), (Pending, Failed) | (Queued, Failed))
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Client request to create an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub market_id: i64,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub outcome: Outcome,
    /// Share count; exclusive with `amount`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    /// Notional dollar amount; quantity is derived from it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    /// Limit price; required iff `type` is LIMIT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Wallet attribution triple; all-or-nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Derive a share quantity from a notional dollar amount at the given price,
/// rounded down to the venue share precision.
pub fn quantity_from_amount(amount: Decimal, price: Decimal) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    let quantity =
        (amount / price).round_dp_with_strategy(SHARE_DECIMALS, RoundingStrategy::ToZero);
    (quantity > Decimal::ZERO).then_some(quantity)
}

/// Order (tracked in our system)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub idempotency_key: String,
    pub market_id: i64,
    pub side: Side,
    pub order_type: OrderType,
    pub outcome: Outcome,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub external_order_id: Option<String>,
    pub failure_reason: Option<String>,
    pub user_wallet_address: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a fresh PENDING order from an admitted request.
    pub fn new(
        idempotency_key: &str,
        request: &CreateOrderRequest,
        quantity: Decimal,
        user_wallet_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.to_string(),
            market_id: request.market_id,
            side: request.side,
            order_type: request.order_type,
            outcome: request.outcome,
            quantity,
            price: request.price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            external_order_id: None,
            failure_reason: None,
            user_wallet_address,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Notional value at the limit price (or a supplied basis price).
    pub fn notional(&self, basis: Decimal) -> Decimal {
        self.quantity * self.price.unwrap_or(basis)
    }

    /// Record a full fill. Fill quantity is capped at the ordered quantity.
    pub fn record_fill(&mut self, fill_price: Decimal, external_order_id: Option<String>) {
        self.status = OrderStatus::Filled;
        self.filled_quantity = self.quantity;
        self.average_fill_price = Some(fill_price);
        self.external_order_id = external_order_id;
    }

    pub fn record_failure(&mut self, reason: &str) {
        self.status = OrderStatus::Failed;
        self.failure_reason = Some(reason.to_string());
    }
}

/// Serializable order projection returned to callers and cached for
/// idempotent replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub market_id: i64,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub outcome: Outcome,
    pub quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            market_id: order.market_id,
            side: order.side,
            order_type: order.order_type,
            outcome: order.outcome,
            quantity: order.quantity,
            price: order.price,
            status: order.status,
            filled_quantity: order.filled_quantity,
            average_fill_price: order.average_fill_price,
            external_order_id: order.external_order_id.clone(),
            failure_reason: order.failure_reason.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            market_id: 1,
            side: Side::Buy,
            order_type: OrderType::Market,
            outcome: Outcome::Yes,
            quantity: Some(dec!(10)),
            amount: None,
            price: None,
            wallet_address: None,
            signature: None,
            nonce: None,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Queued.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
    }

    #[test]
    fn only_pending_and_queued_are_processable() {
        assert!(OrderStatus::Pending.is_processable());
        assert!(OrderStatus::Queued.is_processable());
        assert!(!OrderStatus::Processing.is_processable());
        assert!(!OrderStatus::Cancelled.is_processable());
        assert!(!OrderStatus::Filled.is_processable());
    }

    #[test]
    fn processing_is_cancellable_only_with_venue_order() {
        assert!(OrderStatus::Pending.is_cancellable(false));
        assert!(OrderStatus::Queued.is_cancellable(false));
        assert!(!OrderStatus::Processing.is_cancellable(false));
        assert!(OrderStatus::Processing.is_cancellable(true));
        assert!(!OrderStatus::Cancelled.is_cancellable(true));
        assert!(!OrderStatus::Failed.is_cancellable(true));
    }

    #[test]
    fn transition_edges() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Queued));
        assert!(Queued.can_transition(Processing));
        assert!(Processing.can_transition(Filled));
        assert!(Processing.can_transition(Failed));
        assert!(Queued.can_transition(Cancelled));
        assert!(!Filled.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(Processing));
        assert!(!Queued.can_transition(Filled));
    }

    #[test]
    fn quantity_from_amount_rounds_down() {
        // $10 at 0.60 = 16.666... shares -> 16.66
        assert_eq!(
            quantity_from_amount(dec!(10), dec!(0.60)),
            Some(dec!(16.66))
        );
        assert_eq!(quantity_from_amount(dec!(5), dec!(0.50)), Some(dec!(10)));
        assert_eq!(quantity_from_amount(dec!(1), Decimal::ZERO), None);
        assert_eq!(quantity_from_amount(dec!(0.001), dec!(0.99)), None);
    }

    #[test]
    fn fill_never_exceeds_quantity() {
        let mut order = Order::new("k1", &request(), dec!(10), None);
        order.record_fill(dec!(0.55), Some("venue-1".to_string()));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, order.quantity);
        assert!(order.filled_quantity >= Decimal::ZERO);
        assert!(order.filled_quantity <= order.quantity);
        assert_eq!(order.average_fill_price, Some(dec!(0.55)));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Queued,
            OrderStatus::Processing,
            OrderStatus::Filled,
            OrderStatus::PartiallyFilled,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::try_from_str(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::try_from_str("BOGUS"), None);
    }
}
