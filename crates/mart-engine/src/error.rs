//! Engine error surface.

use thiserror::Error;

/// Everything an engine operation can refuse or fail with.
///
/// Each variant maps to exactly one HTTP response family at the daemon
/// edge; storage failures stay opaque behind [`EngineError::Storage`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The order number is not a valid checksummed digit string.
    #[error("order number failed checksum validation")]
    InvalidNumber,
    /// The order number was already submitted by a different account.
    #[error("order number already submitted by another account")]
    Conflict,
    /// The accrual authority has no record of the order.
    #[error("accrual authority has no record of the order")]
    NotFound,
    /// The accrual authority gave no usable answer within the retry budget.
    #[error("accrual authority is unavailable")]
    Unavailable,
    /// The balance does not cover the requested withdrawal.
    #[error("balance does not cover the requested amount")]
    InsufficientBalance,
    /// Withdrawal amounts must be strictly positive.
    #[error("withdrawal amount must be positive")]
    InvalidAmount,
    /// Storage failed; the operation may or may not have taken effect.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_variant_preserves_the_cause_chain() {
        let cause = anyhow::anyhow!("connection reset").context("insert_order failed");
        let err = EngineError::from(cause);
        assert!(err.to_string().contains("insert_order failed"));
    }

    #[test]
    fn refusals_have_stable_messages() {
        assert_eq!(
            EngineError::InvalidNumber.to_string(),
            "order number failed checksum validation"
        );
        assert_eq!(
            EngineError::InsufficientBalance.to_string(),
            "balance does not cover the requested amount"
        );
    }
}
