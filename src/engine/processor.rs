//! Background order processor
//!
//! Invoked by the queue's worker loop, at-least-once. Each invocation runs
//! one READ COMMITTED transaction; any failure rolls the whole attempt back
//! so the order is left exactly as it was (never stuck in PROCESSING) and
//! the queue's retry policy governs the next delivery.

use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::execution::{ExecutionResult, Executor};
use crate::adapters::postgres::{markets, orders, PostgresStore};
use crate::domain::OrderStatus;
use crate::error::Result;

/// What an invocation did with the job
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The order does not exist; the job was stale. Acknowledged as done.
    StaleJob,
    /// The order is not in a processable state (duplicate delivery, already
    /// cancelled, already terminal). Acknowledged as done.
    NotProcessable { status: OrderStatus },
    /// The order reached a terminal state this attempt.
    Resolved { status: OrderStatus },
}

pub struct OrderProcessor {
    store: PostgresStore,
    executor: Arc<dyn Executor>,
}

impl OrderProcessor {
    pub fn new(store: PostgresStore, executor: Arc<dyn Executor>) -> Self {
        Self { store, executor }
    }

    fn pool(&self) -> &PgPool {
        self.store.pool()
    }

    /// One processing attempt for an order.
    #[instrument(skip(self))]
    pub async fn process(&self, order_id: Uuid) -> Result<ProcessOutcome> {
        let mut tx = self.pool().begin().await?;

        // The row lock serializes this attempt against a concurrent cancel
        // on the same order.
        let Some(mut order) = orders::fetch_for_update(&mut tx, order_id).await? else {
            tx.rollback().await?;
            debug!(%order_id, "stale job: order does not exist");
            return Ok(ProcessOutcome::StaleJob);
        };

        if !order.status.is_processable() {
            let status = order.status;
            tx.rollback().await?;
            debug!(%order_id, %status, "order not processable; duplicate delivery is a no-op");
            return Ok(ProcessOutcome::NotProcessable { status });
        }

        orders::transition(&mut tx, &mut order, OrderStatus::Processing).await?;

        let market = markets::fetch(&mut tx, order.market_id).await?;
        let resolution = match market {
            None => {
                warn!(%order_id, market_id = order.market_id, "market row missing");
                ExecutionResult::rejected("The market for this order is unavailable.")
            }
            Some(market) if !market.is_open() => {
                ExecutionResult::rejected("The market is not accepting orders.")
            }
            Some(market) => self.executor.execute(&order, &market).await?,
        };

        match resolution {
            ExecutionResult::Filled {
                fill_price,
                external_order_id,
            } => order.record_fill(fill_price, external_order_id),
            ExecutionResult::Rejected { reason } => order.record_failure(&reason),
        }

        orders::persist_state(&mut tx, &mut order).await?;
        tx.commit().await?;

        info!(%order_id, status = %order.status, "order resolved");
        Ok(ProcessOutcome::Resolved {
            status: order.status,
        })
    }

    /// Terminal backstop once the queue has exhausted its attempts: no order
    /// is left QUEUED forever. Runs outside any per-attempt transaction.
    pub async fn force_fail(&self, order_id: Uuid, attempts: i32) -> Result<bool> {
        let reason = format!("Order processing gave up after {attempts} attempts.");
        let failed = self.store.force_fail_order(order_id, &reason).await?;
        if failed {
            warn!(%order_id, attempts, "order force-failed after exhausting attempts");
        } else {
            debug!(%order_id, "order already terminal; no backstop needed");
        }
        Ok(failed)
    }
}
