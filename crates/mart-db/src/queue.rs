//! Reconcile queue: delayed visibility, skip-locked claims, claim recovery.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mart_schemas::ReconcileTask;
use sqlx::Row;

use crate::{PgStore, ReconcileQueue};

/// Convert a relative delay into an absolute due time.
fn due_at(delay: Duration) -> Result<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(delay).context("queue delay out of range")?;
    Ok(Utc::now() + delta)
}

#[async_trait]
impl ReconcileQueue for PgStore {
    async fn enqueue(&self, owner: &str, number: &str, delay: Duration) -> Result<()> {
        sqlx::query("insert into reconcile_queue (owner, number, not_before) values ($1, $2, $3)")
            .bind(owner)
            .bind(number)
            .bind(due_at(delay)?)
            .execute(&self.pool)
            .await
            .context("queue enqueue failed")?;
        Ok(())
    }

    async fn claim(&self, consumer: &str, limit: i64) -> Result<Vec<ReconcileTask>> {
        // SKIP LOCKED keeps concurrent consumers from blocking on each
        // other; the claimed_by filter keeps a task with one consumer until
        // it is acked, postponed, or released.
        let rows = sqlx::query(
            r#"
            update reconcile_queue
            set claimed_by = $1,
                claimed_at = now()
            where task_id in (
                select task_id
                from reconcile_queue
                where claimed_by is null
                  and not_before <= now()
                order by not_before
                limit $2
                for update skip locked
            )
            returning task_id, owner, number
            "#,
        )
        .bind(consumer)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("queue claim failed")?;

        rows.into_iter()
            .map(|row| {
                Ok(ReconcileTask {
                    task_id: row.try_get("task_id")?,
                    owner: row.try_get("owner")?,
                    number: row.try_get("number")?,
                })
            })
            .collect()
    }

    async fn ack(&self, task_id: i64) -> Result<bool> {
        let res = sqlx::query("delete from reconcile_queue where task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context("queue ack failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn postpone(&self, task_id: i64, delay: Duration) -> Result<bool> {
        // Clearing the claim and moving not_before happen in one statement,
        // so a crash can never leave the task both unclaimed and lost.
        let res = sqlx::query(
            r#"
            update reconcile_queue
            set claimed_by = null,
                claimed_at = null,
                not_before = $2
            where task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(due_at(delay)?)
        .execute(&self.pool)
        .await
        .context("queue postpone failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn release(&self, task_id: i64) -> Result<bool> {
        let res = sqlx::query(
            r#"
            update reconcile_queue
            set claimed_by = null,
                claimed_at = null
            where task_id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("queue release failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            r#"
            update reconcile_queue
            set claimed_by = null,
                claimed_at = null
            where claimed_by is not null
              and claimed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("queue release_expired failed")?;
        Ok(res.rows_affected())
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("select count(*) from reconcile_queue")
            .fetch_one(&self.pool)
            .await
            .context("queue pending_count failed")?;
        Ok(count)
    }
}
