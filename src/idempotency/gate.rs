//! Idempotency gate
//!
//! Decides, for each incoming mutating request, whether to admit it as new,
//! replay a cached result, or reject it as conflicting. The conditional
//! claim in the store is the single serialization point that makes "at most
//! one admitted request per key" hold under arbitrary concurrency.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::store::{CachedResponse, ClaimOutcome, IdempotencyStore};
use crate::error::{EngineError, Result};

/// Gate decision for an incoming request
#[derive(Debug)]
pub enum Admission {
    /// First sight of this key; the caller owns the request
    New,
    /// The caller's own prior result; treat as the true outcome
    Replay(CachedResponse),
}

pub struct IdempotencyGate {
    store: Arc<dyn IdempotencyStore>,
    default_ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn IdempotencyStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Content hash of the normalized request body.
    ///
    /// serde_json orders object keys deterministically, so two bodies that
    /// differ only in key order produce the same fingerprint.
    pub fn fingerprint(body: &serde_json::Value) -> String {
        let canonical = body.to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }

    /// Admit a request under the given key, or reject it as conflicting.
    pub async fn admit(
        &self,
        key: &str,
        body: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Admission> {
        let request_hash = Self::fingerprint(body);
        let ttl = ttl.unwrap_or(self.default_ttl);

        match self.store.claim(key, &request_hash, ttl).await? {
            ClaimOutcome::Claimed => {
                debug!(key, "idempotency key claimed");
                Ok(Admission::New)
            }
            ClaimOutcome::Existing(record) => {
                if record.locked {
                    // The first attempt's result is not yet known; a second
                    // concurrent attempt must not proceed even with an
                    // identical body.
                    return Err(EngineError::key_in_flight());
                }
                if record.request_hash != request_hash {
                    return Err(EngineError::key_reused());
                }
                match record.response {
                    Some(response) => {
                        debug!(key, status = response.status, "replaying cached response");
                        Ok(Admission::Replay(response))
                    }
                    // Unlocked without a response should not occur; treat it
                    // as still in flight rather than double-admitting.
                    None => Err(EngineError::key_in_flight()),
                }
            }
        }
    }

    /// Unlock the key and attach the response for future replays.
    pub async fn resolve(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()> {
        self.store.resolve(key, status, body).await
    }

    /// Delete the record so the key is fully retryable rather than poisoned
    /// with a cached failure.
    pub async fn release(&self, key: &str) -> Result<()> {
        self.store.release(key).await
    }
}
