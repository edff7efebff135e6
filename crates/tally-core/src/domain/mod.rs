//! Domain model (orders, accrual statuses, wire types).

pub mod order;
pub mod outcome;

pub use order::PendingOrder;
pub use outcome::{AccrualOutcome, AccrualReply, AccrualStatus, OrderItem, OrderRegistration};
