//! Typed domain errors for the billing core.

use crate::models::Money;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Error family, used for logging, metrics and transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    State,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::State => "state",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid meter reading: meter end {meter_end} is below meter start {meter_start}")]
    InvalidReading {
        meter_start: Decimal,
        meter_end: Decimal,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("No active water rate for subscription type {subscription_type_id} as of {as_of}")]
    RateNotFound {
        subscription_type_id: Uuid,
        as_of: NaiveDate,
    },

    #[error("Payment amount {amount} exceeds amount due {amount_due}")]
    Overpayment { amount: Money, amount_due: Money },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidState(String),

    /// Optimistic version check failed; the caller reloads and retries.
    #[error("Invoice {0} was modified concurrently")]
    StaleVersion(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_) | BillingError::InvalidReading { .. } => {
                ErrorKind::Validation
            }
            BillingError::NotFound { .. } | BillingError::RateNotFound { .. } => {
                ErrorKind::NotFound
            }
            BillingError::Overpayment { .. }
            | BillingError::Conflict(_)
            | BillingError::StaleVersion(_) => ErrorKind::Conflict,
            BillingError::InvalidState(_) => ErrorKind::State,
            BillingError::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        BillingError::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BillingError::Conflict(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        BillingError::InvalidState(message.into())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        let message = anyhow::anyhow!(err.to_string());
        match err.kind() {
            ErrorKind::Validation => AppError::BadRequest(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::State => AppError::InvalidState(message),
            ErrorKind::Internal => match err {
                BillingError::Storage(source) => AppError::DatabaseError(source),
                other => AppError::InternalError(anyhow::anyhow!(other.to_string())),
            },
        }
    }
}
