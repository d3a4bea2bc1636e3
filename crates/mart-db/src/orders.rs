//! Order record storage: unique insert, guarded refresh, terminal
//! compare-and-set.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mart_money::Money;
use mart_schemas::{OrderRecord, OrderStatus};
use sqlx::Row;

use crate::{is_unique_constraint_violation, InsertOutcome, OrderStore, PgStore, SettleOutcome};

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &OrderRecord) -> Result<InsertOutcome> {
        if order.status == OrderStatus::Registered {
            return Err(anyhow!("insert_order requires a normalized status, got REGISTERED"));
        }

        let mut tx = self.pool.begin().await.context("insert_order begin failed")?;

        let res = sqlx::query(
            r#"
            insert into orders (number, owner, status, accrual, submitted_at)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&order.number)
        .bind(&order.owner)
        .bind(order.status.as_str())
        .bind(order.accrual.minor())
        .bind(order.submitted_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = res {
            if is_unique_constraint_violation(&e, "orders_pkey") {
                // A unique violation only fires once the winning insert is
                // committed, so a plain pool read decides who owns the number.
                tx.rollback().await.context("insert_order rollback failed")?;
                let owner: Option<String> =
                    sqlx::query_scalar("select owner from orders where number = $1")
                        .bind(&order.number)
                        .fetch_optional(&self.pool)
                        .await
                        .context("insert_order owner lookup failed")?;
                return match owner {
                    Some(o) if o == order.owner => Ok(InsertOutcome::AlreadySubmitted),
                    Some(_) => Ok(InsertOutcome::Conflict),
                    None => Err(anyhow!(
                        "order {} vanished after duplicate-key insert",
                        order.number
                    )),
                };
            }
            return Err(anyhow::Error::new(e).context("insert_order failed"));
        }

        // First contact may already be terminal: the credit rides the same
        // transaction so a crash cannot separate the order from its credit.
        if order.status == OrderStatus::Processed && order.accrual.is_positive() {
            sqlx::query("update balances set current = current + $1 where owner = $2")
                .bind(order.accrual.minor())
                .bind(&order.owner)
                .execute(&mut *tx)
                .await
                .context("insert_order credit failed")?;
        }

        tx.commit().await.context("insert_order commit failed")?;
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

        let res = sqlx::query(
            r#"
            update orders
            set status = $1
            where number = $2
              and status not in ('PROCESSED', 'INVALID')
            "#,
        )
        .bind(status.as_str())
        .bind(number)
        .execute(&self.pool)
        .await
        .context("refresh_status failed")?;

        Ok(res.rows_affected() == 1)
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

        let mut tx = self.pool.begin().await.context("settle_order begin failed")?;

        // The guard covers both terminal states: an INVALID order is as
        // immutable as a PROCESSED one.  RETURNING identifies the owner to
        // credit.
        let row = sqlx::query(
            r#"
            update orders
            set status = $1,
                accrual = $2
            where number = $3
              and status not in ('PROCESSED', 'INVALID')
            returning owner
            "#,
        )
        .bind(status.as_str())
        .bind(accrual.minor())
        .bind(number)
        .fetch_optional(&mut *tx)
        .await
        .context("settle_order update failed")?;

        let Some(row) = row else {
            tx.rollback().await.context("settle_order rollback failed")?;
            let stored: Option<String> =
                sqlx::query_scalar("select status from orders where number = $1")
                    .bind(number)
                    .fetch_optional(&self.pool)
                    .await
                    .context("settle_order status lookup failed")?;
            return Ok(match stored {
                Some(_) => SettleOutcome::AlreadyTerminal,
                None => SettleOutcome::Missing,
            });
        };

        if status == OrderStatus::Processed && accrual.is_positive() {
            let owner: String = row.try_get("owner")?;
            sqlx::query("update balances set current = current + $1 where owner = $2")
                .bind(accrual.minor())
                .bind(&owner)
                .execute(&mut *tx)
                .await
                .context("settle_order credit failed")?;
        }

        tx.commit().await.context("settle_order commit failed")?;
        Ok(SettleOutcome::Applied)
    }

    async fn orders_for(&self, owner: &str) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            select owner, number, status, accrual, submitted_at
            from orders
            where owner = $1
            order by submitted_at
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("orders_for failed")?;

        rows.into_iter()
            .map(|row| {
                Ok(OrderRecord {
                    owner: row.try_get("owner")?,
                    number: row.try_get("number")?,
                    status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
                    accrual: Money::from_minor(row.try_get("accrual")?),
                    submitted_at: row.try_get("submitted_at")?,
                })
            })
            .collect()
    }
}
