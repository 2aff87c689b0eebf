pub mod adapters;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod queue;
pub mod services;
pub mod signing;
pub mod validation;
pub mod venue;

pub use adapters::{PgIdempotencyStore, PostgresStore};
pub use config::{AppConfig, ExecutionMode, QueueConfig};
pub use domain::{CreateOrderRequest, Market, Order, OrderStatus, OrderView, Outcome, Side};
pub use engine::{
    build_executor, ExecutionResult, Executor, OrderEngine, OrderProcessor, ProcessOutcome,
    SubmitResult,
};
pub use error::{EngineError, Result};
pub use idempotency::{Admission, IdempotencyGate, IdempotencyStore};
pub use queue::{
    pg::PgJobQueue, worker::WorkerPool, EnqueueOptions, JobHandle, JobQueue, JobState,
};
pub use signing::{EthSignatureVerifier, SignatureVerifier};
pub use venue::{ClobVenueClient, PaymentClient, RelayerPaymentClient, VenueClient};
