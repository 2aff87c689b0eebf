pub mod gate;
pub mod store;

pub use gate::{Admission, IdempotencyGate};
pub use store::{CachedResponse, ClaimOutcome, IdempotencyRecord, IdempotencyStore};
