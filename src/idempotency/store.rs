//! Idempotency record storage contract
//!
//! Records are keyed by the client-supplied idempotency key and owned
//! exclusively by the gate; no other component touches them. The Postgres
//! implementation lives in `adapters::postgres`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Response cached for replaying a completed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// A stored idempotency record
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub locked: bool,
    pub response: Option<CachedResponse>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a conditional claim
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The key was absent (or expired) and is now claimed, locked, by us
    Claimed,
    /// A live record already exists; claim not taken
    Existing(IdempotencyRecord),
}

/// Storage contract for idempotency records.
///
/// `claim` must be a single conditional write: two concurrent claims for the
/// same key must never both observe "absent".
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically create a locked record if the key is absent or expired.
    async fn claim(&self, key: &str, request_hash: &str, ttl: Duration) -> Result<ClaimOutcome>;

    /// Unlock the record and attach the cached response. The record's TTL is
    /// left untouched.
    async fn resolve(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()>;

    /// Delete the record outright, making the key fully retryable.
    async fn release(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory store double used by gate tests.

    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryIdempotencyStore {
        records: Mutex<HashMap<String, IdempotencyRecord>>,
    }

    impl MemoryIdempotencyStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn contains(&self, key: &str) -> bool {
            self.records.lock().await.contains_key(key)
        }
    }

    #[async_trait]
    impl IdempotencyStore for MemoryIdempotencyStore {
        async fn claim(
            &self,
            key: &str,
            request_hash: &str,
            ttl: Duration,
        ) -> Result<ClaimOutcome> {
            let mut records = self.records.lock().await;
            let now = Utc::now();

            if let Some(existing) = records.get(key) {
                if !existing.is_expired(now) {
                    return Ok(ClaimOutcome::Existing(existing.clone()));
                }
            }

            records.insert(
                key.to_string(),
                IdempotencyRecord {
                    key: key.to_string(),
                    request_hash: request_hash.to_string(),
                    locked: true,
                    response: None,
                    expires_at: now
                        + chrono::Duration::from_std(ttl)
                            .unwrap_or_else(|_| chrono::Duration::seconds(0)),
                },
            );
            Ok(ClaimOutcome::Claimed)
        }

        async fn resolve(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()> {
            let mut records = self.records.lock().await;
            if let Some(record) = records.get_mut(key) {
                record.locked = false;
                record.response = Some(CachedResponse {
                    status,
                    body: body.clone(),
                });
            }
            Ok(())
        }

        async fn release(&self, key: &str) -> Result<()> {
            self.records.lock().await.remove(key);
            Ok(())
        }
    }
}
