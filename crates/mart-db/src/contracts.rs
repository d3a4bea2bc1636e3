//! Storage contracts consumed by the engine.
//!
//! The traits are object-safe so callers can hold `Arc<dyn …>` without
//! knowing the concrete backend; `PgStore` implements all three, and the
//! test kit provides in-memory stand-ins with the same outcome semantics.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mart_money::Money;
use mart_schemas::{BalanceSnapshot, OrderRecord, OrderStatus, ReconcileTask, WithdrawalRecord};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of inserting a new order record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The order number was free; this caller now owns it.
    Inserted,
    /// The same owner already submitted this number.
    AlreadySubmitted,
    /// A different owner already submitted this number.
    Conflict,
}

/// Result of a terminal compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The order moved into the terminal state; any credit was applied.
    Applied,
    /// The order was already terminal; nothing was written.
    AlreadyTerminal,
    /// No order record exists for this number.
    Missing,
}

/// Result of a withdrawal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Balance was sufficient; the debit and the withdrawal record are
    /// committed.
    Accepted,
    /// Balance was insufficient; nothing was mutated.
    Insufficient,
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

/// Order records and their lifecycle writes.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order record.  The number is globally unique; the first
    /// insert wins ownership.  When `order.status` is already `Processed`,
    /// the owner's balance is credited `order.accrual` in the same
    /// transaction as the insert.
    async fn insert_order(&self, order: &OrderRecord) -> Result<InsertOutcome>;

    /// Overwrite the status of a non-terminal order with a fresh
    /// non-terminal poll result.  Returns `false` when the order is missing
    /// or already terminal (the write is skipped).
    async fn refresh_status(&self, number: &str, status: OrderStatus) -> Result<bool>;

    /// Compare-and-set terminal write: move the order into `status` and, iff
    /// the new status is `Processed`, credit the owner `accrual` — both in
    /// one transaction, and only if the stored status is not already
    /// terminal.  Duplicate deliveries of the same terminal result are
    /// no-ops ([`SettleOutcome::AlreadyTerminal`]).
    async fn settle_order(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Money,
    ) -> Result<SettleOutcome>;

    /// All orders submitted by `owner`, oldest first.
    async fn orders_for(&self, owner: &str) -> Result<Vec<OrderRecord>>;
}

// ---------------------------------------------------------------------------
// BalanceLedger
// ---------------------------------------------------------------------------

/// Per-owner balances and the withdrawal log.
///
/// Credits have no standalone entry point here: a balance only increases
/// through [`OrderStore::insert_order`] or [`OrderStore::settle_order`],
/// which tie the credit to the order's first move into `Processed`.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Create the owner's balance row if it does not exist yet.  Idempotent.
    async fn ensure_account(&self, owner: &str) -> Result<()>;

    /// Current balance and lifetime withdrawn total.  Unknown owners read as
    /// all zero.
    async fn balance(&self, owner: &str) -> Result<BalanceSnapshot>;

    /// Atomically debit `amount` from the owner's balance and record the
    /// withdrawal, iff the current balance covers it.  The sufficiency check
    /// and the debit are one conditional statement, so concurrent
    /// withdrawals and credits cannot drive the balance negative.
    async fn withdraw(&self, owner: &str, number: &str, amount: Money)
        -> Result<WithdrawOutcome>;

    /// All withdrawals by `owner`, oldest first.
    async fn withdrawals_for(&self, owner: &str) -> Result<Vec<WithdrawalRecord>>;
}

// ---------------------------------------------------------------------------
// ReconcileQueue
// ---------------------------------------------------------------------------

/// Durable at-least-once queue of order recheck tasks.
///
/// Rows survive restarts.  Delivery may repeat (a consumer that crashes
/// after claiming is recovered by [`ReconcileQueue::release_expired`]), so
/// every downstream write must be idempotent.
#[async_trait]
pub trait ReconcileQueue: Send + Sync {
    /// Schedule a recheck for (owner, number), becoming deliverable at
    /// `now + delay`.
    async fn enqueue(&self, owner: &str, number: &str, delay: Duration) -> Result<()>;

    /// Atomically claim up to `limit` due, unclaimed tasks for `consumer`.
    /// Claimed rows are invisible to other consumers until acked, postponed,
    /// or released.
    async fn claim(&self, consumer: &str, limit: i64) -> Result<Vec<ReconcileTask>>;

    /// Delete a handled task.  Returns `false` when the task no longer
    /// exists.
    async fn ack(&self, task_id: i64) -> Result<bool>;

    /// Push a claimed task back into the queue, deliverable again at
    /// `now + delay`.  Used after a non-terminal poll result and after the
    /// client's retry budget is exhausted.
    async fn postpone(&self, task_id: i64, delay: Duration) -> Result<bool>;

    /// Return a claimed task to the queue without changing its due time.
    /// Used when handling fails before any decision could be made.
    async fn release(&self, task_id: i64) -> Result<bool>;

    /// Crash recovery: release every claim older than `cutoff`.  Returns the
    /// number of recovered tasks.
    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Number of tasks not yet acked (claimed or waiting).
    async fn pending_count(&self) -> Result<i64>;
}
