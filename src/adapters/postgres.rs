use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Row};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{Market, Order, OrderStatus, OrderType, Outcome, Side};
use crate::error::{EngineError, Result};
use crate::idempotency::store::{
    CachedResponse, ClaimOutcome, IdempotencyRecord, IdempotencyStore,
};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch an order by id (no lock)
    pub async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch(&mut conn, id).await
    }

    /// Terminal backstop: force an order to FAILED unless it already reached
    /// a terminal state. Runs outside any per-attempt transaction.
    #[instrument(skip(self))]
    pub async fn force_fail_order(&self, id: Uuid, reason: &str) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE orders SET
                status = 'FAILED',
                failure_reason = $2,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'QUEUED', 'PROCESSING')
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }
}

/// Order row operations. Transaction-scoped callers pass their own
/// connection so reads and writes share the caller's isolation level and
/// row locks.
pub mod orders {
    use super::*;

    const SELECT_COLUMNS: &str = r#"
        SELECT id, idempotency_key, market_id, side, order_type, outcome,
               quantity, price, status, filled_quantity, average_fill_price,
               external_order_id, failure_reason, user_wallet_address,
               version, created_at, updated_at
        FROM orders
    "#;

    pub async fn insert(conn: &mut PgConnection, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, idempotency_key, market_id, side, order_type, outcome,
                quantity, price, status, filled_quantity, average_fill_price,
                external_order_id, failure_reason, user_wallet_address,
                version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW(), NOW())
            "#,
        )
        .bind(order.id)
        .bind(&order.idempotency_key)
        .bind(order.market_id)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.outcome.as_str())
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.status.as_str())
        .bind(order.filled_quantity)
        .bind(order.average_fill_price)
        .bind(&order.external_order_id)
        .bind(&order.failure_reason)
        .bind(&order.user_wallet_address)
        .bind(order.version)
        .execute(&mut *conn)
        .await?;

        debug!(order_id = %order.id, "inserted order");
        Ok(())
    }

    pub async fn fetch(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(|r| from_row(&r)).transpose()
    }

    /// Fetch with a row-level write lock. Processor and cancellation both
    /// load through this, so their transactions serialize on the row.
    pub async fn fetch_for_update(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{} WHERE id = $1 FOR UPDATE", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(|r| from_row(&r)).transpose()
    }

    /// Persist the order's mutable execution state. The write expects to
    /// move `version` from N to exactly N+1; a concurrent writer makes this
    /// fail with a conflict.
    pub async fn persist_state(conn: &mut PgConnection, order: &mut Order) -> Result<()> {
        if order.filled_quantity < Decimal::ZERO || order.filled_quantity > order.quantity {
            return Err(EngineError::Internal(format!(
                "fill bookkeeping out of range for order {}: {} of {}",
                order.id, order.filled_quantity, order.quantity
            )));
        }

        let rows = sqlx::query(
            r#"
            UPDATE orders SET
                status = $1,
                filled_quantity = $2,
                average_fill_price = $3,
                external_order_id = $4,
                failure_reason = $5,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(order.status.as_str())
        .bind(order.filled_quantity)
        .bind(order.average_fill_price)
        .bind(&order.external_order_id)
        .bind(&order.failure_reason)
        .bind(order.id)
        .bind(order.version)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(EngineError::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            )));
        }

        order.version += 1;
        order.updated_at = Utc::now();
        Ok(())
    }

    /// Guarded status transition: rejects edges the state machine does not
    /// allow, then persists optimistically.
    pub async fn transition(
        conn: &mut PgConnection,
        order: &mut Order,
        to: OrderStatus,
    ) -> Result<()> {
        if !order.status.can_transition(to) {
            return Err(EngineError::InvalidState(format!(
                "order {} cannot move from {} to {}",
                order.id, order.status, to
            )));
        }
        order.status = to;
        persist_state(conn, order).await
    }

    pub(super) fn from_row(row: &sqlx::postgres::PgRow) -> Result<Order> {
        let side: String = row.get("side");
        let order_type: String = row.get("order_type");
        let outcome: String = row.get("outcome");
        let status: String = row.get("status");

        Ok(Order {
            id: row.get("id"),
            idempotency_key: row.get("idempotency_key"),
            market_id: row.get("market_id"),
            side: Side::try_from_str(&side)
                .ok_or_else(|| EngineError::Internal(format!("unknown order side: {side}")))?,
            order_type: OrderType::try_from_str(&order_type).ok_or_else(|| {
                EngineError::Internal(format!("unknown order type: {order_type}"))
            })?,
            outcome: Outcome::try_from_str(&outcome)
                .ok_or_else(|| EngineError::Internal(format!("unknown outcome: {outcome}")))?,
            quantity: row.get("quantity"),
            price: row.get("price"),
            status: OrderStatus::try_from_str(&status)
                .ok_or_else(|| EngineError::Internal(format!("unknown order status: {status}")))?,
            filled_quantity: row.get("filled_quantity"),
            average_fill_price: row.get("average_fill_price"),
            external_order_id: row.get("external_order_id"),
            failure_reason: row.get("failure_reason"),
            user_wallet_address: row.get("user_wallet_address"),
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Market snapshot reads. This engine never writes markets; the sync
/// pipeline owns them.
pub mod markets {
    use super::*;

    const SELECT_COLUMNS: &str = r#"
        SELECT id, external_condition_id, question, active, closed,
               yes_price, no_price, min_order_value, updated_at
        FROM markets
    "#;

    pub async fn fetch(conn: &mut PgConnection, id: i64) -> Result<Option<Market>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|r| from_row(&r)))
    }

    /// Read-locked fetch used during order creation, so a concurrent
    /// close/deactivate cannot slip between the read and the order insert.
    pub async fn fetch_for_share(conn: &mut PgConnection, id: i64) -> Result<Option<Market>> {
        let row = sqlx::query(&format!("{} WHERE id = $1 FOR SHARE", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|r| from_row(&r)))
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> Market {
        Market {
            id: row.get("id"),
            external_condition_id: row.get("external_condition_id"),
            question: row.get("question"),
            active: row.get("active"),
            closed: row.get("closed"),
            yes_price: row.get("yes_price"),
            no_price: row.get("no_price"),
            min_order_value: row.get("min_order_value"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Postgres-backed idempotency record store.
///
/// The claim is one conditional INSERT: the `ON CONFLICT` arm only fires for
/// expired records, so two concurrent claims can never both succeed.
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn claim(&self, key: &str, request_hash: &str, ttl: Duration) -> Result<ClaimOutcome> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| EngineError::Internal(format!("idempotency TTL out of range: {e}")))?;

        // Insert if absent; reclaim in place if expired; otherwise no row
        // comes back and the live record is inspected instead.
        let claimed = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, locked, expires_at, created_at, updated_at)
            VALUES ($1, $2, TRUE, $3, NOW(), NOW())
            ON CONFLICT (key) DO UPDATE SET
                request_hash = EXCLUDED.request_hash,
                locked = TRUE,
                response_status = NULL,
                response_body = NULL,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            WHERE idempotency_keys.expires_at <= NOW()
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let row = sqlx::query(
            r#"
            SELECT key, request_hash, locked, response_status, response_body, expires_at
            FROM idempotency_keys
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: Option<i32> = row.get("response_status");
                let body: Option<serde_json::Value> = row.get("response_body");
                let response = match (status, body) {
                    (Some(status), Some(body)) => Some(CachedResponse {
                        status: status as u16,
                        body,
                    }),
                    _ => None,
                };

                Ok(ClaimOutcome::Existing(IdempotencyRecord {
                    key: row.get("key"),
                    request_hash: row.get("request_hash"),
                    locked: row.get("locked"),
                    response,
                    expires_at: row.get("expires_at"),
                }))
            }
            // The holder released (or expired) between our two statements;
            // report the key as in flight and let the caller retry.
            None => Ok(ClaimOutcome::Existing(IdempotencyRecord {
                key: key.to_string(),
                request_hash: String::new(),
                locked: true,
                response: None,
                expires_at: Utc::now(),
            })),
        }
    }

    async fn resolve(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys SET
                locked = FALSE,
                response_status = $2,
                response_body = $3,
                updated_at = NOW()
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(status as i32)
        .bind(body)
        .execute(&self.pool)
        .await?;

        debug!(key, status, "idempotency key resolved");
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        debug!(key, "idempotency key released");
        Ok(())
    }
}
