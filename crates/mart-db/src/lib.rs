//! PostgreSQL storage for the loyalty order engine.
//!
//! Three contracts live here, each implemented for [`PgStore`]:
//!
//! - [`OrderStore`] — order records with a unique-number insert and a
//!   compare-and-set terminal write that credits the owner in the same
//!   transaction.
//! - [`BalanceLedger`] — per-owner balances with a race-safe withdraw.
//! - [`ReconcileQueue`] — durable at-least-once task queue with delayed
//!   visibility and `FOR UPDATE SKIP LOCKED` claims.
//!
//! All mutation of contended state (order status, balances) happens through
//! single-statement conditional writes inside this crate; callers never
//! read-then-write.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod contracts;
mod ledger;
mod orders;
mod queue;

pub use contracts::{
    BalanceLedger, InsertOutcome, OrderStore, ReconcileQueue, SettleOutcome, WithdrawOutcome,
};

pub const ENV_DB_URL: &str = "MART_DATABASE_URL";

/// Connect to Postgres using MART_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Connect to Postgres at the given URL.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus { ok, has_orders_table: exists })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Postgres-backed implementation of all three storage contracts.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Detect a Postgres unique constraint violation by name.
///
/// SQLSTATE 23505 is unique_violation.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}
