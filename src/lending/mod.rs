//! Lending lifecycle
//!
//! The state machine over book copies and orders, the cached projections
//! read by callers, the service applying mutations, and the overdue sweep.

pub mod accrual;
pub mod clock;
pub mod infos;
pub mod projections;
pub mod service;
pub mod state;

pub use accrual::{spawn_daily_accrual, AccrualReport, OverdueAccrualJob};
pub use clock::{Clock, FixedClock, SystemClock};
pub use infos::*;
pub use projections::Projections;
pub use service::{CustodyChange, DFreeOrderChange, DFreeOrderRequest, LendingService, OrderChange};
