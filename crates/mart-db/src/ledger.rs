//! Balance ledger: idempotent account creation, atomic conditional
//! withdrawal, read paths.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mart_money::Money;
use mart_schemas::{BalanceSnapshot, WithdrawalRecord};
use sqlx::Row;

use crate::{BalanceLedger, PgStore, WithdrawOutcome};

#[async_trait]
impl BalanceLedger for PgStore {
    async fn ensure_account(&self, owner: &str) -> Result<()> {
        sqlx::query("insert into balances (owner) values ($1) on conflict (owner) do nothing")
            .bind(owner)
            .execute(&self.pool)
            .await
            .context("ensure_account failed")?;
        Ok(())
    }

    async fn balance(&self, owner: &str) -> Result<BalanceSnapshot> {
        let row = sqlx::query("select current, withdrawn from balances where owner = $1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .context("balance query failed")?;

        match row {
            Some(row) => Ok(BalanceSnapshot {
                current: Money::from_minor(row.try_get("current")?),
                withdrawn: Money::from_minor(row.try_get("withdrawn")?),
            }),
            None => Ok(BalanceSnapshot::default()),
        }
    }

    async fn withdraw(&self, owner: &str, number: &str, amount: Money) -> Result<WithdrawOutcome> {
        if !amount.is_positive() {
            return Err(anyhow!("withdraw amount must be positive, got {}", amount));
        }

        let mut tx = self.pool.begin().await.context("withdraw begin failed")?;

        // Sufficiency check and debit are a single conditional statement;
        // zero rows means the balance did not cover the amount at write time.
        let debited = sqlx::query(
            r#"
            update balances
            set current = current - $1,
                withdrawn = withdrawn + $1
            where owner = $2
              and current >= $1
            "#,
        )
        .bind(amount.minor())
        .bind(owner)
        .execute(&mut *tx)
        .await
        .context("withdraw debit failed")?;

        if debited.rows_affected() == 0 {
            tx.rollback().await.context("withdraw rollback failed")?;
            return Ok(WithdrawOutcome::Insufficient);
        }

        sqlx::query("insert into withdrawals (owner, number, amount) values ($1, $2, $3)")
            .bind(owner)
            .bind(number)
            .bind(amount.minor())
            .execute(&mut *tx)
            .await
            .context("withdraw record insert failed")?;

        tx.commit().await.context("withdraw commit failed")?;
        Ok(WithdrawOutcome::Accepted)
    }

    async fn withdrawals_for(&self, owner: &str) -> Result<Vec<WithdrawalRecord>> {
        let rows = sqlx::query(
            r#"
            select owner, number, amount, processed_at
            from withdrawals
            where owner = $1
            order by processed_at
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("withdrawals_for failed")?;

        rows.into_iter()
            .map(|row| {
                Ok(WithdrawalRecord {
                    owner: row.try_get("owner")?,
                    number: row.try_get("number")?,
                    amount: Money::from_minor(row.try_get("amount")?),
                    processed_at: row.try_get("processed_at")?,
                })
            })
            .collect()
    }
}
