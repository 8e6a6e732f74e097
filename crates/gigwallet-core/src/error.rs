//! Error types for the wallet ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The caller supplied an invalid amount, reference or state transition.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A user, wallet, purchase or subscription does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The wallet cannot cover a debit.
    ///
    /// Only used internally to choose between the wallet and card funding paths.
    #[error("insufficient funds: balance={balance}, required={required}")]
    InsufficientFunds {
        /// Current balance in cents.
        balance: i64,
        /// Required amount in cents.
        required: i64,
    },

    /// The payment gateway failed or refused a request.
    #[error("payment gateway error: {message}")]
    Gateway {
        /// Error message from the gateway adapter.
        message: String,
        /// Whether the caller may retry with the same idempotency reference.
        retryable: bool,
    },

    /// A gateway event cannot be applied to the ledger cleanly.
    #[error("reconciliation conflict on {reference}: {reason}")]
    ReconciliationConflict {
        /// Reference of the affected transaction.
        reference: String,
        /// Why the event could not be applied.
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl BillingError {
    /// Shorthand for a [`BillingError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Gateway {
                retryable: true,
                ..
            } | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let transient = BillingError::Gateway {
            message: "timeout".into(),
            retryable: true,
        };
        let permanent = BillingError::Gateway {
            message: "card declined".into(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!BillingError::Validation("amount".into()).is_retryable());
    }

    #[test]
    fn not_found_message() {
        let err = BillingError::not_found("wallet", "abc");
        assert_eq!(err.to_string(), "wallet not found: abc");
    }
}
