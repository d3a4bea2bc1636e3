//! mart-engine
//!
//! Order lifecycle engine: submission, balance operations, and the
//! reconciliation worker pool that chases every open order until the accrual
//! authority gives a terminal verdict.
//!
//! The engine talks to the world through the `mart-db` storage contracts and
//! the `mart-accrual` client trait, so every policy in this crate can be
//! exercised against in-memory fakes.

pub mod error;
pub mod luhn;
pub mod pool;
pub mod service;

pub use error::EngineError;
pub use pool::{spawn, PoolConfig, PoolHandle};
pub use service::{OrderService, Submission};

use std::sync::Arc;

use mart_accrual::AccrualClient;
use mart_db::{BalanceLedger, OrderStore, ReconcileQueue};

/// Shared handles every engine component works through.
#[derive(Clone)]
pub struct EngineDeps {
    pub orders: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn BalanceLedger>,
    pub queue: Arc<dyn ReconcileQueue>,
    pub accrual: Arc<dyn AccrualClient>,
}
