//! Error types for the Shopfront engine.

use crate::{order::OrderStatus, OrderId, ProductId};
use thiserror::Error;

/// All possible errors from the Shopfront engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Document errors
    #[error("invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    // Cart errors
    #[error("quantity must be a positive integer, got {0}")]
    InvalidQuantity(i64),

    #[error("cart line not found: {0}")]
    LineNotFound(ProductId),

    #[error("cart is empty")]
    EmptyCart,

    // Payment method errors
    #[error("unknown payment method: {0}")]
    UnknownPaymentMethod(String),

    #[error("payment method is disabled: {0}")]
    PaymentMethodDisabled(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    // Order errors
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    // Snapshot errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Build an [`Error::InvalidDocument`] for a document path.
    pub fn invalid_document(path: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidDocument {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error was raised by a business rule rather than bad data.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Error::PolicyViolation(_)
                | Error::PaymentMethodDisabled(_)
                | Error::InvalidTransition { .. }
                | Error::EmptyCart
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::LineNotFound("p-1".into());
        assert_eq!(err.to_string(), "cart line not found: p-1");

        let err = Error::InvalidTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition from delivered to pending"
        );

        let err = Error::invalid_document("orders/o-1", "items is not an array");
        assert_eq!(
            err.to_string(),
            "invalid document orders/o-1: items is not an array"
        );
    }

    #[test]
    fn policy_classification() {
        assert!(Error::PolicyViolation("last method".into()).is_policy());
        assert!(Error::EmptyCart.is_policy());
        assert!(!Error::LineNotFound("p".into()).is_policy());
    }
}
