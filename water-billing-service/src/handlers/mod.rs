//! HTTP handlers for water-billing-service.

pub mod accounts;
pub mod billing_runs;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod rates;
pub mod reports;
pub mod usages;

use crate::error::{BillingError, ErrorKind};
use crate::services::metrics::record_error;
use service_core::error::AppError;

/// Count a failed core operation and convert it for the response.
pub(crate) fn failed(operation: &'static str) -> impl Fn(BillingError) -> AppError {
    move |err| {
        record_error(operation, &err);
        match err.kind() {
            ErrorKind::Internal => tracing::error!(operation, error = %err, "Operation failed"),
            kind => tracing::info!(operation, kind = kind.as_str(), error = %err, "Request rejected"),
        }
        AppError::from(err)
    }
}
