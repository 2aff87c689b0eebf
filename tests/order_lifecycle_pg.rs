//! End-to-end lifecycle tests against a real PostgreSQL instance.
//!
//! Run with a scratch database:
//!     DATABASE_URL=postgres://localhost/parlay_test cargo test -- --ignored

use std::sync::Arc;

use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use uuid::Uuid;

use parlay::adapters::PgIdempotencyStore;
use parlay::config::{ExecutionConfig, ExecutionMode, QueueConfig};
use parlay::engine::{OrderEngine, OrderProcessor, ProcessOutcome, SimulatedExecutor};
use parlay::idempotency::IdempotencyGate;
use parlay::queue::{pg::PgJobQueue, JobQueue};
use parlay::signing::EthSignatureVerifier;
use parlay::{CreateOrderRequest, EngineError, OrderStatus, PostgresStore};

struct Harness {
    store: PostgresStore,
    engine: OrderEngine,
    processor: OrderProcessor,
    queue: Arc<PgJobQueue>,
}

async fn harness() -> Harness {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");

    let store = PostgresStore::from_pool(pool.clone());
    store.migrate().await.expect("run migrations");

    let queue = Arc::new(PgJobQueue::new(pool.clone(), QueueConfig::default()));
    let gate = IdempotencyGate::new(
        Arc::new(PgIdempotencyStore::new(pool.clone())),
        std::time::Duration::from_secs(3600),
    );
    let engine = OrderEngine::new(
        store.clone(),
        gate,
        queue.clone() as Arc<dyn JobQueue>,
        Arc::new(EthSignatureVerifier::new()),
        None,
    );

    let executor = SimulatedExecutor::new(ExecutionConfig {
        mode: ExecutionMode::Simulated,
        sim_failure_rate: 0.0,
        sim_latency_min_ms: 0,
        sim_latency_max_ms: 0,
    });
    let processor = OrderProcessor::new(store.clone(), Arc::new(executor));

    Harness {
        store,
        engine,
        processor,
        queue,
    }
}

async fn insert_market(harness: &Harness, active: bool, closed: bool) -> i64 {
    let row = sqlx::query(
        r#"
        INSERT INTO markets (external_condition_id, question, active, closed, yes_price, no_price)
        VALUES ($1, $2, $3, $4, 0.60, 0.40)
        RETURNING id
        "#,
    )
    .bind(format!("0x{}", Uuid::new_v4().simple()))
    .bind("lifecycle test market")
    .bind(active)
    .bind(closed)
    .fetch_one(harness.store.pool())
    .await
    .expect("insert market");
    row.get("id")
}

fn request(market_id: i64) -> CreateOrderRequest {
    serde_json::from_value(serde_json::json!({
        "marketId": market_id,
        "side": "BUY",
        "type": "MARKET",
        "outcome": "YES",
        "quantity": "10",
    }))
    .expect("request deserializes")
}

fn fresh_key() -> String {
    format!("k-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn same_key_replays_and_different_body_conflicts() {
    let harness = harness().await;
    let market_id = insert_market(&harness, true, false).await;
    let key = fresh_key();
    let request = request(market_id);

    let first = harness.engine.submit_order(&key, &request).await.unwrap();
    assert!(!first.replayed);

    // Identical resubmission replays the identical order.
    let second = harness.engine.submit_order(&key, &request).await.unwrap();
    assert!(second.replayed);
    assert_eq!(first.order.id, second.order.id);

    // Same key, different parameters: conflict.
    let mut altered = request.clone();
    altered.quantity = Some(dec!(20));
    let err = harness.engine.submit_order(&key, &altered).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn closed_market_rejects_creation_without_inserting() {
    let harness = harness().await;
    let market_id = insert_market(&harness, true, true).await;
    let key = fresh_key();

    let err = harness
        .engine
        .submit_order(&key, &request(market_id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MarketNotActive(_)));

    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM orders WHERE idempotency_key = $1")
        .bind(&key)
        .fetch_one(harness.store.pool())
        .await
        .unwrap()
        .get("n");
    assert_eq!(count, 0);

    // The failed creation released the key, so a corrected retry is allowed.
    let open_market = insert_market(&harness, true, false).await;
    assert!(harness
        .engine
        .submit_order(&key, &request(open_market))
        .await
        .is_ok());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn queued_order_processes_to_filled_with_bounded_fill() {
    let harness = harness().await;
    let market_id = insert_market(&harness, true, false).await;

    let submitted = harness
        .engine
        .submit_order(&fresh_key(), &request(market_id))
        .await
        .unwrap();
    assert_eq!(submitted.order.status, OrderStatus::Queued);

    let outcome = harness.processor.process(submitted.order.id).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Resolved {
            status: OrderStatus::Filled
        }
    ));

    let order = harness.engine.get_order(submitted.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity, order.quantity);
    assert_eq!(order.average_fill_price, Some(dec!(0.60)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn cancelled_queued_order_loses_its_job_and_redelivery_is_noop() {
    let harness = harness().await;
    let market_id = insert_market(&harness, true, false).await;

    let submitted = harness
        .engine
        .submit_order(&fresh_key(), &request(market_id))
        .await
        .unwrap();

    let cancelled = harness.engine.cancel_order(submitted.order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    // The queued job was removed.
    let open = harness.queue.list_open(submitted.order.id).await.unwrap();
    assert!(open.is_empty());

    // A late delivery of that job (queue race) is a no-op.
    let outcome = harness.processor.process(submitted.order.id).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::NotProcessable {
            status: OrderStatus::Cancelled
        }
    ));
    let order = harness.engine.get_order(submitted.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    // Cancelling again is rejected with the current status attached.
    let err = harness.engine.cancel_order(submitted.order.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotCancellable {
            status: OrderStatus::Cancelled
        }
    ));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn limit_buy_above_market_fails_with_limit_reason() {
    let harness = harness().await;
    let market_id = insert_market(&harness, true, false).await;

    // LIMIT BUY at 0.50 against a YES price of 0.60.
    let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
        "marketId": market_id,
        "side": "BUY",
        "type": "LIMIT",
        "outcome": "YES",
        "quantity": "10",
        "price": "0.50",
    }))
    .unwrap();

    let submitted = harness
        .engine
        .submit_order(&fresh_key(), &request)
        .await
        .unwrap();
    let outcome = harness.processor.process(submitted.order.id).await.unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Resolved {
            status: OrderStatus::Failed
        }
    ));

    let order = harness.engine.get_order(submitted.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    let reason = order.failure_reason.expect("failure reason recorded");
    assert!(reason.contains("limit price"), "unexpected reason: {reason}");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn stale_job_for_missing_order_is_acknowledged() {
    let harness = harness().await;
    let outcome = harness.processor.process(Uuid::new_v4()).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::StaleJob));
}
