//! In-memory implementation of the three storage contracts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mart_db::{
    BalanceLedger, InsertOutcome, OrderStore, ReconcileQueue, SettleOutcome, WithdrawOutcome,
};
use mart_money::Money;
use mart_schemas::{BalanceSnapshot, OrderRecord, OrderStatus, ReconcileTask, WithdrawalRecord};

#[derive(Debug, Clone)]
struct QueuedTask {
    task_id: i64,
    owner: String,
    number: String,
    not_before: DateTime<Utc>,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    orders: Vec<OrderRecord>,
    balances: HashMap<String, BalanceSnapshot>,
    withdrawals: Vec<WithdrawalRecord>,
    tasks: Vec<QueuedTask>,
    next_task_id: i64,
    fail_settles: u32,
}

/// Single-process stand-in for `PgStore`.
///
/// One mutex serializes every operation, which stands in for the row locks
/// and single-statement writes the real store leans on: claims are
/// exclusive, settling is compare-and-set, and a debit cannot interleave
/// with the sufficiency check.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Keep working even if a panicking test poisoned the lock.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stored record for `number`, if any.
    pub fn order(&self, number: &str) -> Option<OrderRecord> {
        self.lock().orders.iter().find(|o| o.number == number).cloned()
    }

    /// Create `owner`'s account holding exactly `current`, bypassing the
    /// order flow.
    pub fn seed_balance(&self, owner: &str, current: Money) {
        let mut state = self.lock();
        let snapshot = state.balances.entry(owner.to_string()).or_default();
        snapshot.current = current;
    }

    /// Make the next `n` calls to `settle_order` fail.
    pub fn fail_next_settles(&self, n: u32) {
        self.lock().fail_settles = n;
    }
}

fn credit(state: &mut State, owner: &str, amount: Money) {
    if let Some(snapshot) = state.balances.get_mut(owner) {
        snapshot.current += amount;
    }
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &OrderRecord) -> Result<InsertOutcome> {
        if order.status == OrderStatus::Registered {
            return Err(anyhow!("insert_order requires a normalized status, got REGISTERED"));
        }

        let mut state = self.lock();
        // The real store's foreign key makes an account row a precondition.
        if !state.balances.contains_key(&order.owner) {
            return Err(anyhow!(
                "no account row for owner {}; call ensure_account first",
                order.owner
            ));
        }
        if let Some(existing) = state.orders.iter().find(|o| o.number == order.number) {
            return Ok(if existing.owner == order.owner {
                InsertOutcome::AlreadySubmitted
            } else {
                InsertOutcome::Conflict
            });
        }

        state.orders.push(order.clone());
        if order.status == OrderStatus::Processed && order.accrual.is_positive() {
            credit(&mut state, &order.owner, order.accrual);
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn refresh_status(&self, number: &str, status: OrderStatus) -> Result<bool> {
        if status.is_terminal() {
            return Err(anyhow!(
                "refresh_status requires a non-terminal status, got {}",
                status.as_str()
            ));
        }
        if status == OrderStatus::Registered {
            return Err(anyhow!("refresh_status requires a normalized status, got REGISTERED"));
        }

        let mut state = self.lock();
        match state.orders.iter_mut().find(|o| o.number == number) {
            Some(order) if !order.status.is_terminal() => {
                order.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn settle_order(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Money,
    ) -> Result<SettleOutcome> {
        if !status.is_terminal() {
            return Err(anyhow!(
                "settle_order requires a terminal status, got {}",
                status.as_str()
            ));
        }

        let mut state = self.lock();
        if state.fail_settles > 0 {
            state.fail_settles -= 1;
            return Err(anyhow!("injected settle failure"));
        }

        let Some(idx) = state.orders.iter().position(|o| o.number == number) else {
            return Ok(SettleOutcome::Missing);
        };
        if state.orders[idx].status.is_terminal() {
            return Ok(SettleOutcome::AlreadyTerminal);
        }

        state.orders[idx].status = status;
        state.orders[idx].accrual = accrual;
        let owner = state.orders[idx].owner.clone();
        if status == OrderStatus::Processed && accrual.is_positive() {
            credit(&mut state, &owner, accrual);
        }
        Ok(SettleOutcome::Applied)
    }

    async fn orders_for(&self, owner: &str) -> Result<Vec<OrderRecord>> {
        // Insertion order is submission order, oldest first.
        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// BalanceLedger
// ---------------------------------------------------------------------------

#[async_trait]
impl BalanceLedger for MemoryStore {
    async fn ensure_account(&self, owner: &str) -> Result<()> {
        self.lock().balances.entry(owner.to_string()).or_default();
        Ok(())
    }

    async fn balance(&self, owner: &str) -> Result<BalanceSnapshot> {
        Ok(self.lock().balances.get(owner).copied().unwrap_or_default())
    }

    async fn withdraw(
        &self,
        owner: &str,
        number: &str,
        amount: Money,
    ) -> Result<WithdrawOutcome> {
        if !amount.is_positive() {
            return Err(anyhow!("withdraw amount must be positive, got {}", amount));
        }

        let mut state = self.lock();
        match state.balances.get_mut(owner) {
            Some(snapshot) if snapshot.current >= amount => {
                snapshot.current -= amount;
                snapshot.withdrawn += amount;
            }
            _ => return Ok(WithdrawOutcome::Insufficient),
        }
        state.withdrawals.push(WithdrawalRecord {
            owner: owner.to_string(),
            number: number.to_string(),
            amount,
            processed_at: Utc::now(),
        });
        Ok(WithdrawOutcome::Accepted)
    }

    async fn withdrawals_for(&self, owner: &str) -> Result<Vec<WithdrawalRecord>> {
        Ok(self
            .lock()
            .withdrawals
            .iter()
            .filter(|w| w.owner == owner)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ReconcileQueue
// ---------------------------------------------------------------------------

#[async_trait]
impl ReconcileQueue for MemoryStore {
    async fn enqueue(&self, owner: &str, number: &str, delay: Duration) -> Result<()> {
        let not_before =
            Utc::now() + chrono::Duration::from_std(delay).context("queue delay out of range")?;
        let mut state = self.lock();
        let task_id = state.next_task_id;
        state.next_task_id += 1;
        state.tasks.push(QueuedTask {
            task_id,
            owner: owner.to_string(),
            number: number.to_string(),
            not_before,
            claimed_by: None,
            claimed_at: None,
        });
        Ok(())
    }

    async fn claim(&self, consumer: &str, limit: i64) -> Result<Vec<ReconcileTask>> {
        let now = Utc::now();
        let mut state = self.lock();

        let mut due: Vec<usize> = state
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.claimed_by.is_none() && t.not_before <= now)
            .map(|(idx, _)| idx)
            .collect();
        due.sort_by_key(|&idx| state.tasks[idx].not_before);

        let mut out = Vec::new();
        for &idx in due.iter().take(usize::try_from(limit).unwrap_or(0)) {
            let task = &mut state.tasks[idx];
            task.claimed_by = Some(consumer.to_string());
            task.claimed_at = Some(now);
            out.push(ReconcileTask {
                task_id: task.task_id,
                owner: task.owner.clone(),
                number: task.number.clone(),
            });
        }
        Ok(out)
    }

    async fn ack(&self, task_id: i64) -> Result<bool> {
        let mut state = self.lock();
        let before = state.tasks.len();
        state.tasks.retain(|t| t.task_id != task_id);
        Ok(state.tasks.len() < before)
    }

    async fn postpone(&self, task_id: i64, delay: Duration) -> Result<bool> {
        let not_before =
            Utc::now() + chrono::Duration::from_std(delay).context("queue delay out of range")?;
        let mut state = self.lock();
        match state.tasks.iter_mut().find(|t| t.task_id == task_id) {
            Some(task) => {
                task.claimed_by = None;
                task.claimed_at = None;
                task.not_before = not_before;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, task_id: i64) -> Result<bool> {
        let mut state = self.lock();
        match state.tasks.iter_mut().find(|t| t.task_id == task_id) {
            Some(task) => {
                task.claimed_by = None;
                task.claimed_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.lock();
        let mut released = 0;
        for task in state.tasks.iter_mut() {
            if task.claimed_by.is_some() && task.claimed_at.is_some_and(|at| at < cutoff) {
                task.claimed_by = None;
                task.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self.lock().tasks.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let store = MemoryStore::new();
        store.enqueue("alice", "79927398713", Duration::ZERO).await.unwrap();

        let first = store.claim("a", 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(store.claim("b", 10).await.unwrap().is_empty());

        assert!(store.release(first[0].task_id).await.unwrap());
        assert_eq!(store.claim("b", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn postpone_moves_the_due_time_forward() {
        let store = MemoryStore::new();
        store.enqueue("alice", "79927398713", Duration::ZERO).await.unwrap();

        let claimed = store.claim("a", 10).await.unwrap();
        assert!(store.postpone(claimed[0].task_id, Duration::from_secs(300)).await.unwrap());

        assert!(store.claim("b", 10).await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn settle_credits_the_owner_exactly_once() {
        let store = MemoryStore::new();
        store.ensure_account("alice").await.unwrap();
        store
            .insert_order(&OrderRecord {
                owner: "alice".to_string(),
                number: "12345678903".to_string(),
                status: OrderStatus::New,
                accrual: Money::ZERO,
                submitted_at: Utc::now(),
            })
            .await
            .unwrap();

        let amount = Money::from_minor(729_98);
        let first = store
            .settle_order("12345678903", OrderStatus::Processed, amount)
            .await
            .unwrap();
        let second = store
            .settle_order("12345678903", OrderStatus::Processed, amount)
            .await
            .unwrap();

        assert_eq!(first, SettleOutcome::Applied);
        assert_eq!(second, SettleOutcome::AlreadyTerminal);
        assert_eq!(store.balance("alice").await.unwrap().current, amount);
    }
}
