pub mod hmac;
pub mod verifier;

pub use hmac::{ApiCredentials, HmacAuth};
pub use verifier::{canonical_order_message, EthSignatureVerifier, SignatureVerifier};
