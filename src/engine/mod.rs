//! Order engine
//!
//! Front door for order intake and cancellation. Construction is explicit:
//! the process wires stores, gate, queue, and collaborators together once at
//! startup and hands the engine to whatever serves requests.

pub mod execution;
pub mod processor;

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::postgres::{markets, orders, PostgresStore};
use crate::domain::{
    order::quantity_from_amount, CreateOrderRequest, Order, OrderStatus, OrderType, OrderView,
};
use crate::error::{EngineError, Result};
use crate::idempotency::{Admission, IdempotencyGate};
use crate::queue::{EnqueueOptions, JobQueue};
use crate::signing::{canonical_order_message, SignatureVerifier};
use crate::validation;
use crate::venue::VenueClient;

pub use execution::{build_executor, ExecutionResult, Executor, RealExecutor, SimulatedExecutor};
pub use processor::{OrderProcessor, ProcessOutcome};

/// Result of an idempotent submission
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub order: OrderView,
    /// True when this is the cached outcome of the caller's original request
    pub replayed: bool,
}

pub struct OrderEngine {
    store: PostgresStore,
    gate: IdempotencyGate,
    queue: Arc<dyn JobQueue>,
    verifier: Arc<dyn SignatureVerifier>,
    /// Present in real-execution deployments; used for best-effort remote
    /// cancellation of live venue orders.
    venue: Option<Arc<dyn VenueClient>>,
}

impl OrderEngine {
    pub fn new(
        store: PostgresStore,
        gate: IdempotencyGate,
        queue: Arc<dyn JobQueue>,
        verifier: Arc<dyn SignatureVerifier>,
        venue: Option<Arc<dyn VenueClient>>,
    ) -> Self {
        Self {
            store,
            gate,
            queue,
            verifier,
            venue,
        }
    }

    /// Idempotent order submission: admit the key, create the order once,
    /// replay the original outcome on retries.
    #[instrument(skip(self, request))]
    pub async fn submit_order(
        &self,
        idempotency_key: &str,
        request: &CreateOrderRequest,
    ) -> Result<SubmitResult> {
        validation::validate_create_request(request)?;
        let body = serde_json::to_value(request)?;

        match self.gate.admit(idempotency_key, &body, None).await? {
            Admission::Replay(cached) => {
                let order: OrderView = serde_json::from_value(cached.body)?;
                debug!(idempotency_key, order_id = %order.id, "replayed prior submission");
                Ok(SubmitResult {
                    order,
                    replayed: true,
                })
            }
            Admission::New => match self.create_order(idempotency_key, request).await {
                Ok(view) => {
                    let response = serde_json::to_value(&view)?;
                    if let Err(e) = self.gate.resolve(idempotency_key, 201, &response).await {
                        // The order exists; a failed cache write must not
                        // fail the submission. The key unlocks via TTL.
                        error!(idempotency_key, "failed to cache idempotent response: {e}");
                    }
                    Ok(SubmitResult {
                        order: view,
                        replayed: false,
                    })
                }
                Err(e) => {
                    // Leave the key fully retryable instead of poisoning it
                    // with a cached failure.
                    if let Err(release_err) = self.gate.release(idempotency_key).await {
                        error!(idempotency_key, "failed to release idempotency key: {release_err}");
                    }
                    Err(e)
                }
            },
        }
    }

    /// Create the order inside a serializable transaction and hand it to the
    /// queue after commit.
    async fn create_order(
        &self,
        idempotency_key: &str,
        request: &CreateOrderRequest,
    ) -> Result<OrderView> {
        let mut tx = self.store.pool().begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        // Locked read: a concurrent close/deactivate cannot slip between
        // this check and the insert.
        let market = markets::fetch_for_share(&mut tx, request.market_id)
            .await?
            .ok_or(EngineError::MarketNotFound(request.market_id))?;
        if !market.is_open() {
            return Err(EngineError::MarketNotActive(market.id));
        }

        let user_wallet_address = match &request.wallet_address {
            Some(address) => {
                let signature = request.signature.as_deref().ok_or_else(|| {
                    EngineError::Validation("signature is required for wallet orders".to_string())
                })?;
                let nonce = request.nonce.as_deref().ok_or_else(|| {
                    EngineError::Validation("nonce is required for wallet orders".to_string())
                })?;
                let message = canonical_order_message(request, nonce);
                if !self.verifier.verify(&message, signature, address).await? {
                    return Err(EngineError::InvalidSignature);
                }
                Some(address.clone())
            }
            None => None,
        };

        let quantity = match (request.quantity, request.amount) {
            (Some(quantity), _) => quantity,
            (None, Some(amount)) => {
                // Market orders derive from the current side price; the
                // actual fill price is resolved later, at processing time.
                let basis = match request.order_type {
                    OrderType::Limit => request.price.ok_or_else(|| {
                        EngineError::Validation("price is required for LIMIT orders".to_string())
                    })?,
                    OrderType::Market => market.price_for(request.outcome),
                };
                quantity_from_amount(amount, basis).ok_or_else(|| {
                    EngineError::Validation(
                        "amount is too small to buy any shares at the current price".to_string(),
                    )
                })?
            }
            (None, None) => {
                return Err(EngineError::Validation(
                    "either quantity or amount is required".to_string(),
                ));
            }
        };
        validation::validate_quantity(quantity)?;

        let mut order = Order::new(idempotency_key, request, quantity, user_wallet_address);
        orders::insert(&mut tx, &order).await?;
        tx.commit().await?;

        info!(order_id = %order.id, market_id = market.id, "order created");

        // Queue hand-off happens strictly after commit so an enqueue never
        // references a rolled-back order.
        match self.queue.enqueue(order.id, EnqueueOptions::default()).await {
            Ok(job) => {
                debug!(order_id = %order.id, job_id = job.id, "order job enqueued");
                let mut conn = self.store.pool().acquire().await?;
                if let Err(e) =
                    orders::transition(&mut conn, &mut order, OrderStatus::Queued).await
                {
                    // A fast worker may already own the row; it is
                    // authoritative, so refresh the view instead of fighting.
                    debug!(order_id = %order.id, "skipping QUEUED transition: {e}");
                    if let Some(fresh) = self.store.get_order(order.id).await? {
                        order = fresh;
                    }
                }
            }
            Err(e) => {
                // The order stays PENDING for the reconciliation sweep; it
                // must never be silently lost.
                error!(order_id = %order.id, "failed to enqueue order job: {e}");
            }
        }

        Ok(OrderView::from(&order))
    }

    /// Cancel an order, racing safely against the processor.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderView> {
        let mut tx = self.store.pool().begin().await?;

        // Pessimistic write lock: a concurrent process attempt on the same
        // row waits until this transaction finishes.
        let Some(mut order) = orders::fetch_for_update(&mut tx, order_id).await? else {
            return Err(EngineError::OrderNotFound(order_id));
        };

        if !order
            .status
            .is_cancellable(order.external_order_id.is_some())
        {
            return Err(EngineError::NotCancellable {
                status: order.status,
            });
        }

        let was_queued = order.status == OrderStatus::Queued;

        // Best-effort remote cancel; the local record is authoritative, so
        // the local cancellation proceeds whatever the venue says.
        if let Some(venue_order_id) = order.external_order_id.clone() {
            match &self.venue {
                Some(venue) => match venue.cancel_order(&venue_order_id).await {
                    Ok(ack) if !ack.success => {
                        warn!(%order_id, %venue_order_id, reason = ?ack.message, "venue declined cancellation");
                    }
                    Ok(_) => debug!(%order_id, %venue_order_id, "venue cancelled order"),
                    Err(e) => {
                        warn!(%order_id, %venue_order_id, "venue cancellation failed: {e}");
                    }
                },
                None => {
                    debug!(%order_id, %venue_order_id, "no venue client configured; skipping remote cancel");
                }
            }
        }

        orders::transition(&mut tx, &mut order, OrderStatus::Cancelled).await?;
        tx.commit().await?;
        info!(%order_id, "order cancelled");

        // Best-effort cleanup of queued work, outside the transaction.
        if was_queued {
            match self.queue.list_open(order_id).await {
                Ok(jobs) => {
                    for job in jobs {
                        if let Err(e) = self.queue.remove(job.id).await {
                            warn!(%order_id, job_id = job.id, "failed to remove queued job: {e}");
                        }
                    }
                }
                Err(e) => warn!(%order_id, "failed to list queued jobs: {e}"),
            }
        }

        Ok(OrderView::from(&order))
    }

    /// Fetch a single order.
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView> {
        self.store
            .get_order(order_id)
            .await?
            .map(|order| OrderView::from(&order))
            .ok_or(EngineError::OrderNotFound(order_id))
    }
}
