//! Payments recorded against invoices.

use super::invoice::short_id;
use super::Money;
use crate::error::BillingError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    EWallet,
    Other,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] = [
        PaymentMethod::Cash,
        PaymentMethod::BankTransfer,
        PaymentMethod::Card,
        PaymentMethod::EWallet,
        PaymentMethod::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::EWallet => "e_wallet",
            PaymentMethod::Other => "other",
        }
    }

    /// Every method except cash needs a reference number to reconcile against.
    pub fn requires_reference(&self) -> bool {
        !matches!(self, PaymentMethod::Cash)
    }
}

impl FromStr for PaymentMethod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "card" => Ok(PaymentMethod::Card),
            "e_wallet" => Ok(PaymentMethod::EWallet),
            "other" => Ok(PaymentMethod::Other),
            other => Err(BillingError::validation(format!(
                "Unknown payment method '{}'",
                other
            ))),
        }
    }
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Voided,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Voided => "voided",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "voided" => Ok(PaymentStatus::Voided),
            other => Err(BillingError::validation(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Payment event. Append-only; voiding flips the status and keeps the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub receipt_number: String,
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference_number: Option<String>,
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub created_utc: DateTime<Utc>,
    pub voided_utc: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub voided_by: Option<String>,
}

impl Payment {
    /// Build a completed payment after validating its inputs.
    pub fn completed(
        input: CreatePayment,
        customer_id: Uuid,
        recorded_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        if !input.amount.is_positive() {
            return Err(BillingError::validation(
                "Payment amount must be greater than zero",
            ));
        }
        let reference_number = input
            .reference_number
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if input.method.requires_reference() && reference_number.is_none() {
            return Err(BillingError::validation(format!(
                "Reference number is required for {} payments",
                input.method.as_str()
            )));
        }

        let payment_id = Uuid::new_v4();
        Ok(Self {
            payment_id,
            receipt_number: format!(
                "RCP-{}-{}",
                input.payment_date.format("%Y%m%d"),
                short_id(payment_id)
            ),
            invoice_id: input.invoice_id,
            customer_id,
            amount: input.amount,
            method: input.method,
            payment_date: input.payment_date,
            reference_number,
            status: PaymentStatus::Completed,
            notes: input.notes,
            recorded_by: recorded_by.to_string(),
            created_utc: now,
            voided_utc: None,
            void_reason: None,
            voided_by: None,
        })
    }

    pub fn void(
        &mut self,
        reason: Option<String>,
        voided_by: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if self.status != PaymentStatus::Completed {
            return Err(BillingError::invalid_state(format!(
                "Payment {} is {} and cannot be voided",
                self.receipt_number,
                self.status.as_str()
            )));
        }
        self.status = PaymentStatus::Voided;
        self.voided_utc = Some(now);
        self.void_reason = reason;
        self.voided_by = Some(voided_by.to_string());
        Ok(())
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub invoice_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(method: PaymentMethod, reference: Option<&str>) -> CreatePayment {
        CreatePayment {
            invoice_id: Uuid::new_v4(),
            amount: Money::from_minor(100_000),
            method,
            reference_number: reference.map(str::to_string),
            payment_date: "2024-02-01".parse().unwrap(),
            notes: None,
        }
    }

    #[test]
    fn non_cash_requires_reference() {
        let err = Payment::completed(
            input(PaymentMethod::BankTransfer, None),
            Uuid::new_v4(),
            "op-1",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        let err = Payment::completed(
            input(PaymentMethod::EWallet, Some("   ")),
            Uuid::new_v4(),
            "op-1",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        let cash = Payment::completed(
            input(PaymentMethod::Cash, None),
            Uuid::new_v4(),
            "op-1",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(cash.status, PaymentStatus::Completed);
        assert!(cash.receipt_number.starts_with("RCP-20240201-"));
    }

    #[test]
    fn only_completed_payments_can_be_voided() {
        let mut payment = Payment::completed(
            input(PaymentMethod::BankTransfer, Some("TRX1")),
            Uuid::new_v4(),
            "op-1",
            Utc::now(),
        )
        .unwrap();
        payment.void(Some("bounced".into()), "admin-1", Utc::now()).unwrap();
        assert_eq!(payment.status, PaymentStatus::Voided);
        assert_eq!(payment.voided_by.as_deref(), Some("admin-1"));

        let err = payment.void(None, "admin-1", Utc::now()).unwrap_err();
        assert!(matches!(err, BillingError::InvalidState(_)));
    }

    #[test]
    fn method_strings_are_closed() {
        for method in PaymentMethod::ALL {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
        assert!("cheque".parse::<PaymentMethod>().is_err());
    }
}
