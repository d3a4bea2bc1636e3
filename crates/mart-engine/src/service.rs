//! Order and balance operations behind the HTTP surface.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use mart_accrual::AccrualError;
use mart_db::{InsertOutcome, WithdrawOutcome};
use mart_money::Money;
use mart_schemas::{BalanceSnapshot, OrderRecord, OrderStatus, WithdrawalRecord};

use crate::{luhn, EngineDeps, EngineError};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a submission ended when it did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The order is now on record (and queued if still open).
    Accepted,
    /// The same account already submitted this number; nothing changed.
    AlreadySubmitted,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The operations the daemon exposes per account.
///
/// All methods take the owner explicitly; authentication happened upstream.
#[derive(Clone)]
pub struct OrderService {
    deps: EngineDeps,
    recheck_delay: Duration,
}

impl OrderService {
    /// `recheck_delay` is both the rest before the first authority poll and
    /// the rest between polls; open orders are chased on that cadence.
    pub fn new(deps: EngineDeps, recheck_delay: Duration) -> Self {
        Self {
            deps,
            recheck_delay,
        }
    }

    /// Register an order number for `owner`.
    ///
    /// The authority is consulted first: an order it has never heard of is
    /// refused outright, and an order it already settled is recorded with
    /// its credit in the same stroke. Anything still open joins the
    /// reconcile queue.
    pub async fn submit_order(
        &self,
        owner: &str,
        number: &str,
    ) -> Result<Submission, EngineError> {
        if !luhn::is_valid(number) {
            return Err(EngineError::InvalidNumber);
        }

        let reply = match self.deps.accrual.fetch(number).await {
            Ok(reply) => reply,
            Err(AccrualError::NotFound(_)) => return Err(EngineError::NotFound),
            Err(err) => {
                warn!(number, error = %err, "accrual fetch failed during submission");
                return Err(EngineError::Unavailable);
            }
        };

        self.deps.ledger.ensure_account(owner).await?;

        let record = OrderRecord {
            owner: owner.to_string(),
            number: number.to_string(),
            // The client already normalized REGISTERED away.
            status: reply.status,
            accrual: match (reply.status, reply.accrual) {
                (OrderStatus::Processed, Some(amount)) => amount,
                _ => Money::ZERO,
            },
            submitted_at: Utc::now(),
        };

        match self.deps.orders.insert_order(&record).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::AlreadySubmitted => return Ok(Submission::AlreadySubmitted),
            InsertOutcome::Conflict => return Err(EngineError::Conflict),
        }

        if !record.status.is_terminal() {
            self.deps
                .queue
                .enqueue(owner, number, self.recheck_delay)
                .await?;
        }
        debug!(number, status = record.status.as_str(), "order submitted");

        Ok(Submission::Accepted)
    }

    /// Every order of `owner`, oldest submission first.
    pub async fn orders(&self, owner: &str) -> Result<Vec<OrderRecord>, EngineError> {
        Ok(self.deps.orders.orders_for(owner).await?)
    }

    /// Spendable and spent totals for `owner`. Unknown owners read as zero.
    pub async fn balance(&self, owner: &str) -> Result<BalanceSnapshot, EngineError> {
        Ok(self.deps.ledger.balance(owner).await?)
    }

    /// Spend part of the balance against an order number.
    ///
    /// The number only has to pass the checksum; it does not need to be a
    /// submitted order.
    pub async fn withdraw(
        &self,
        owner: &str,
        number: &str,
        amount: Money,
    ) -> Result<(), EngineError> {
        if !luhn::is_valid(number) {
            return Err(EngineError::InvalidNumber);
        }
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount);
        }

        self.deps.ledger.ensure_account(owner).await?;
        match self.deps.ledger.withdraw(owner, number, amount).await? {
            WithdrawOutcome::Accepted => {
                debug!(number, amount = %amount, "withdrawal accepted");
                Ok(())
            }
            WithdrawOutcome::Insufficient => Err(EngineError::InsufficientBalance),
        }
    }

    /// Every accepted withdrawal of `owner`, oldest first.
    pub async fn withdrawals(&self, owner: &str) -> Result<Vec<WithdrawalRecord>, EngineError> {
        Ok(self.deps.ledger.withdrawals_for(owner).await?)
    }
}
