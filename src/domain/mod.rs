pub mod market;
pub mod order;

pub use market::Market;
pub use order::{
    CreateOrderRequest, Order, OrderStatus, OrderType, OrderView, Outcome, Side, SHARE_DECIMALS,
};
