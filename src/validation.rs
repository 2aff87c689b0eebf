/// Request validation for order intake
///
/// Guard functions called at the top of each contract method, before any
/// transaction opens. Malformed parameters never reach the database.
use rust_decimal::Decimal;

use crate::domain::{CreateOrderRequest, OrderType};
use crate::error::{EngineError, Result};

/// Upper bound on a single order's share count
const MAX_QUANTITY: u64 = 1_000_000;

/// Validate a binary option price (must be strictly between 0 and 1)
pub fn validate_price(price: Decimal, field_name: &str) -> Result<()> {
    if price <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "{} must be positive: {}",
            field_name, price
        )));
    }

    if price >= Decimal::ONE {
        return Err(EngineError::Validation(format!(
            "{} must be below 1.0: {}",
            field_name, price
        )));
    }

    Ok(())
}

/// Validate a share quantity
pub fn validate_quantity(quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(EngineError::Validation(
            "quantity must be positive".to_string(),
        ));
    }

    if quantity > Decimal::from(MAX_QUANTITY) {
        return Err(EngineError::Validation(format!(
            "quantity exceeds the maximum of {}",
            MAX_QUANTITY
        )));
    }

    Ok(())
}

/// Validate a create-order request before any transaction opens.
pub fn validate_create_request(request: &CreateOrderRequest) -> Result<()> {
    match (request.quantity, request.amount) {
        (None, None) => {
            return Err(EngineError::Validation(
                "either quantity or amount is required".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(EngineError::Validation(
                "quantity and amount are mutually exclusive".to_string(),
            ));
        }
        (Some(quantity), None) => validate_quantity(quantity)?,
        (None, Some(amount)) => {
            if amount <= Decimal::ZERO {
                return Err(EngineError::Validation(
                    "amount must be positive".to_string(),
                ));
            }
        }
    }

    match (request.order_type, request.price) {
        (OrderType::Limit, None) => {
            return Err(EngineError::Validation(
                "price is required for LIMIT orders".to_string(),
            ));
        }
        (OrderType::Market, Some(_)) => {
            return Err(EngineError::Validation(
                "price is not allowed for MARKET orders".to_string(),
            ));
        }
        (OrderType::Limit, Some(price)) => validate_price(price, "price")?,
        (OrderType::Market, None) => {}
    }

    // Wallet attribution is all-or-nothing: address, signature, and nonce
    // must arrive together.
    let wallet_parts = [
        request.wallet_address.is_some(),
        request.signature.is_some(),
        request.nonce.is_some(),
    ];
    if wallet_parts.iter().any(|p| *p) && !wallet_parts.iter().all(|p| *p) {
        return Err(EngineError::Validation(
            "walletAddress, signature and nonce must be provided together".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, Side};
    use rust_decimal_macros::dec;

    fn base_request() -> CreateOrderRequest {
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
    fn market_order_with_quantity_passes() {
        assert!(validate_create_request(&base_request()).is_ok());
    }

    #[test]
    fn quantity_and_amount_are_exclusive() {
        let mut req = base_request();
        req.amount = Some(dec!(25));
        assert!(validate_create_request(&req).is_err());

        req.quantity = None;
        assert!(validate_create_request(&req).is_ok());

        req.amount = None;
        assert!(validate_create_request(&req).is_err());
    }

    #[test]
    fn limit_requires_price_market_forbids_it() {
        let mut req = base_request();
        req.order_type = OrderType::Limit;
        assert!(validate_create_request(&req).is_err());

        req.price = Some(dec!(0.45));
        assert!(validate_create_request(&req).is_ok());

        req.order_type = OrderType::Market;
        assert!(validate_create_request(&req).is_err());
    }

    #[test]
    fn price_must_be_inside_unit_interval() {
        assert!(validate_price(dec!(0.5), "price").is_ok());
        assert!(validate_price(Decimal::ZERO, "price").is_err());
        assert!(validate_price(Decimal::ONE, "price").is_err());
        assert!(validate_price(dec!(-0.1), "price").is_err());
        assert!(validate_price(dec!(1.5), "price").is_err());
    }

    #[test]
    fn partial_wallet_triple_is_rejected() {
        let mut req = base_request();
        req.wallet_address = Some("0x1111111111111111111111111111111111111111".to_string());
        assert!(validate_create_request(&req).is_err());

        req.signature = Some("0xsig".to_string());
        assert!(validate_create_request(&req).is_err());

        req.nonce = Some("42".to_string());
        assert!(validate_create_request(&req).is_ok());
    }
}
