//! Wallet-signature verification
//!
//! Wallet-attributed orders carry an EIP-191 personal-sign signature over a
//! canonical order message. The verifier recovers the signer and compares it
//! to the claimed address; signature *generation* stays on the client.

use async_trait::async_trait;
use ethers::types::{Address, Signature};

use crate::domain::CreateOrderRequest;
use crate::error::{EngineError, Result};

/// Domain tag for the signed order message
const MESSAGE_DOMAIN: &str = "parlay-order-v1";

/// Canonical message a wallet signs to attribute an order.
///
/// Field order is fixed, so the message is independent of how the JSON body
/// was keyed. Decimals are normalized ("10.00" and "10" sign identically).
pub fn canonical_order_message(request: &CreateOrderRequest, nonce: &str) -> String {
    let size = request
        .quantity
        .or(request.amount)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| "-".to_string());
    let price = request
        .price
        .map(|p| p.normalize().to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}",
        MESSAGE_DOMAIN,
        request.market_id,
        request.side,
        request.outcome,
        request.order_type,
        size,
        price,
        nonce,
    )
}

/// Verifies that a signature over a message recovers to an expected address.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, message: &str, signature: &str, expected_address: &str) -> Result<bool>;
}

/// EIP-191 personal-sign verifier
#[derive(Debug, Clone, Default)]
pub struct EthSignatureVerifier;

impl EthSignatureVerifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignatureVerifier for EthSignatureVerifier {
    async fn verify(&self, message: &str, signature: &str, expected_address: &str) -> Result<bool> {
        let signature: Signature = signature
            .parse()
            .map_err(|e| EngineError::Signature(format!("malformed signature: {e}")))?;

        let expected: Address = expected_address
            .parse()
            .map_err(|e| EngineError::Signature(format!("malformed wallet address: {e}")))?;

        let recovered = signature
            .recover(message)
            .map_err(|e| EngineError::Signature(format!("signature recovery failed: {e}")))?;

        Ok(recovered == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Outcome, Side};
    use ethers::signers::{LocalWallet, Signer};
    use rust_decimal_macros::dec;

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            market_id: 7,
            side: Side::Buy,
            order_type: OrderType::Limit,
            outcome: Outcome::Yes,
            quantity: Some(dec!(10.00)),
            amount: None,
            price: Some(dec!(0.45)),
            wallet_address: None,
            signature: None,
            nonce: None,
        }
    }

    #[test]
    fn canonical_message_is_stable_and_normalized() {
        let mut a = request();
        let b = request();
        a.quantity = Some(dec!(10)); // 10 vs 10.00 must sign the same bytes
        assert_eq!(
            canonical_order_message(&a, "42"),
            canonical_order_message(&b, "42")
        );
        assert_ne!(
            canonical_order_message(&a, "42"),
            canonical_order_message(&a, "43")
        );
    }

    #[tokio::test]
    async fn recovers_the_signing_wallet() {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let message = canonical_order_message(&request(), "42");
        let signature = wallet.sign_message(&message).await.unwrap();

        let verifier = EthSignatureVerifier::new();
        let address = format!("{:?}", wallet.address());

        assert!(verifier
            .verify(&message, &signature.to_string(), &address)
            .await
            .unwrap());

        // A different wallet must not verify.
        let other = LocalWallet::new(&mut rand::thread_rng());
        let other_address = format!("{:?}", other.address());
        assert!(!verifier
            .verify(&message, &signature.to_string(), &other_address)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn malformed_inputs_error_rather_than_verify() {
        let verifier = EthSignatureVerifier::new();
        assert!(verifier
            .verify("msg", "0xzz", "0x0000000000000000000000000000000000000001")
            .await
            .is_err());
        assert!(verifier
            .verify("msg", "0x", "not-an-address")
            .await
            .is_err());
    }
}
