pub mod postgres;

pub use postgres::{markets, orders, PgIdempotencyStore, PostgresStore};
