use anyhow::anyhow;
use chrono::{DateTime, Utc};
use mart_money::Money;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a loyalty order, as reported by the accrual authority.
///
/// `Processed` and `Invalid` are terminal; a stored order never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Registered,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(anyhow!("invalid order status: {}", other)),
        }
    }

    /// Terminal states end polling and are never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// The authority's `REGISTERED` and a fresh `NEW` order are the same
    /// externally visible state; only the normalized form is ever stored.
    pub fn normalized(self) -> Self {
        match self {
            OrderStatus::Registered => OrderStatus::New,
            other => other,
        }
    }
}

/// One submitted order and its lifecycle state.  `accrual` is meaningful only
/// once the status is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub owner: String,
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Money,
    pub submitted_at: DateTime<Utc>,
}

/// Point-in-time view of one account: spendable balance and lifetime
/// withdrawn total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub current: Money,
    pub withdrawn: Money,
}

/// One accepted withdrawal, immutable once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRecord {
    pub owner: String,
    pub number: String,
    pub amount: Money,
    pub processed_at: DateTime<Utc>,
}

/// Reply from the accrual authority for a single order number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualReply {
    #[serde(rename = "order")]
    pub number: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub accrual: Option<Money>,
}

/// One claimed delivery from the reconcile queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileTask {
    pub task_id: i64,
    pub owner: String,
    pub number: String,
}
