//! Request and response types for all mart-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use chrono::{DateTime, Utc};
use mart_money::Money;
use mart_schemas::{OrderRecord, OrderStatus, WithdrawalRecord};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error body
// ---------------------------------------------------------------------------

/// Uniform body for every refused request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// GET /api/user/orders
// ---------------------------------------------------------------------------

/// One order in the listing, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub number: String,
    pub status: OrderStatus,
    /// Awarded points. The field is omitted entirely until something was
    /// credited, so open orders serialize without an `accrual` key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Money>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<OrderRecord> for OrderView {
    fn from(record: OrderRecord) -> Self {
        Self {
            number: record.number,
            status: record.status,
            accrual: record.accrual.is_positive().then_some(record.accrual),
            uploaded_at: record.submitted_at,
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/user/balance/withdraw
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// Target order number; must pass the checksum.
    pub order: String,
    /// Points to spend, as a decimal amount.
    pub sum: Money,
}

// ---------------------------------------------------------------------------
// GET /api/user/withdrawals
// ---------------------------------------------------------------------------

/// One accepted withdrawal in the listing, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalView {
    pub order: String,
    pub sum: Money,
    pub processed_at: DateTime<Utc>,
}

impl From<WithdrawalRecord> for WithdrawalView {
    fn from(record: WithdrawalRecord) -> Self {
        Self {
            order: record.number,
            sum: record.amount,
            processed_at: record.processed_at,
        }
    }
}
