use crate::error::{EngineError, Result};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// API credentials for venue L2 authentication
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            secret,
            passphrase,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("PARLAY_VENUE_API_KEY")
            .map_err(|_| EngineError::Config(config::ConfigError::NotFound("PARLAY_VENUE_API_KEY".into())))?;
        let secret = std::env::var("PARLAY_VENUE_SECRET")
            .map_err(|_| EngineError::Config(config::ConfigError::NotFound("PARLAY_VENUE_SECRET".into())))?;
        let passphrase = std::env::var("PARLAY_VENUE_PASSPHRASE")
            .map_err(|_| EngineError::Config(config::ConfigError::NotFound("PARLAY_VENUE_PASSPHRASE".into())))?;

        Ok(Self::new(api_key, secret, passphrase))
    }
}

/// HMAC authentication helper for venue API requests
#[derive(Clone)]
pub struct HmacAuth {
    credentials: ApiCredentials,
}

impl HmacAuth {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Get current timestamp in seconds
    fn timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System clock is before UNIX epoch")
            .as_secs() as i64
    }

    /// HMAC-SHA256 over `timestamp + method + path + body`, keyed with the
    /// base64url-decoded API secret.
    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> Result<String> {
        let key = URL_SAFE
            .decode(&self.credentials.secret)
            .map_err(|e| EngineError::Signature(format!("invalid API secret encoding: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| EngineError::Signature(format!("invalid HMAC key length: {e}")))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// Build the authentication headers for a request.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> Result<HeaderMap> {
        let timestamp = Self::timestamp();
        let signature = self.sign(timestamp, method, path, body)?;

        let mut headers = HeaderMap::new();
        headers.insert("X-API-KEY", header_value(&self.credentials.api_key)?);
        headers.insert("X-API-PASSPHRASE", header_value(&self.credentials.passphrase)?);
        headers.insert("X-API-SIGNATURE", header_value(&signature)?);
        headers.insert("X-API-TIMESTAMP", header_value(&timestamp.to_string())?);
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| EngineError::Signature(format!("invalid header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> HmacAuth {
        HmacAuth::new(ApiCredentials::new(
            "key-1".to_string(),
            URL_SAFE.encode(b"super-secret"),
            "phrase".to_string(),
        ))
    }

    #[test]
    fn signature_is_deterministic_per_input() {
        let auth = auth();
        let a = auth.sign(1_700_000_000, "POST", "/order", "{}").unwrap();
        let b = auth.sign(1_700_000_000, "POST", "/order", "{}").unwrap();
        let c = auth.sign(1_700_000_000, "POST", "/order", r#"{"x":1}"#).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn headers_carry_all_auth_fields() {
        let headers = auth().headers("GET", "/ok", "").unwrap();
        assert!(headers.contains_key("X-API-KEY"));
        assert!(headers.contains_key("X-API-PASSPHRASE"));
        assert!(headers.contains_key("X-API-SIGNATURE"));
        assert!(headers.contains_key("X-API-TIMESTAMP"));
    }

    #[test]
    fn malformed_secret_is_rejected() {
        let auth = HmacAuth::new(ApiCredentials::new(
            "key-1".to_string(),
            "!!not-base64!!".to_string(),
            "phrase".to_string(),
        ));
        assert!(auth.sign(1, "GET", "/ok", "").is_err());
    }
}
