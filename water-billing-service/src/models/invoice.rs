//! Invoice aggregate and its status machine.
//!
//! ```text
//!   unpaid ──pay──▶ partial ──pay──▶ paid
//!     │               │               ▲
//!     └──due date─────┴──▶ overdue ───┘ (pay in full)
//!   unpaid | partial | overdue ──void──▶ void (terminal)
//! ```
//!
//! Reversing a payment walks back along the payment axis (paid → partial →
//! unpaid) except that an overdue invoice stays overdue until it is paid.

use super::Money;
use crate::error::BillingError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Partial,
    Paid,
    Overdue,
    Void,
}

impl InvoiceStatus {
    pub const OUTSTANDING: [InvoiceStatus; 3] = [
        InvoiceStatus::Unpaid,
        InvoiceStatus::Partial,
        InvoiceStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Void => "void",
        }
    }

    /// Still owes money and can take payments.
    pub fn is_outstanding(&self) -> bool {
        Self::OUTSTANDING.contains(self)
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(InvoiceStatus::Unpaid),
            "partial" => Ok(InvoiceStatus::Partial),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "void" => Ok(InvoiceStatus::Void),
            other => Err(BillingError::validation(format!(
                "Unknown invoice status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Money,
    pub amount: Money,
}

impl LineItem {
    /// Flat fee charged once.
    pub fn fee(description: impl Into<String>, amount: Money) -> Self {
        Self {
            description: description.into(),
            quantity: Decimal::ONE,
            unit_price: amount,
            amount,
        }
    }

    /// Quantity × unit price, rounded to a whole minor unit.
    pub fn metered(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Money,
    ) -> Result<Self, BillingError> {
        let amount = unit_price.times(quantity).ok_or_else(|| {
            BillingError::validation(format!(
                "Line amount overflows for quantity {} at {}",
                quantity, unit_price
            ))
        })?;
        Ok(Self {
            description: description.into(),
            quantity,
            unit_price,
            amount,
        })
    }
}

/// Invoice document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub usage_id: Option<Uuid>,
    pub billing_period: NaiveDate,
    pub line_items: Vec<LineItem>,
    pub subtotal: Money,
    pub tax_percentage: Decimal,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub amount_due: Money,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub voided_utc: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
}

/// Everything needed to issue an invoice; totals are derived.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub customer_id: Uuid,
    pub usage_id: Option<Uuid>,
    pub billing_period: NaiveDate,
    pub line_items: Vec<LineItem>,
    pub tax_percentage: Decimal,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
}

impl Invoice {
    /// Issue an invoice: `subtotal = Σ lines`, tax after fees, `total = subtotal + tax`.
    pub fn issue(input: NewInvoice, now: DateTime<Utc>) -> Result<Self, BillingError> {
        if input.line_items.is_empty() {
            return Err(BillingError::validation(
                "Cannot issue invoice without line items",
            ));
        }
        if input.tax_percentage < Decimal::ZERO {
            return Err(BillingError::validation("Tax percentage cannot be negative"));
        }
        if input.due_date < input.issue_date {
            return Err(BillingError::validation(
                "Due date cannot be before issue date",
            ));
        }

        let subtotal = Money::checked_sum(input.line_items.iter().map(|item| item.amount))
            .ok_or_else(|| BillingError::validation("Invoice subtotal is out of range"))?;
        let tax_amount = subtotal
            .percent(input.tax_percentage)
            .ok_or_else(|| BillingError::validation("Tax amount overflows"))?;
        let total_amount = subtotal
            .checked_add(tax_amount)
            .ok_or_else(|| BillingError::validation("Invoice total is out of range"))?;

        let invoice_id = Uuid::new_v4();
        let mut invoice = Self {
            invoice_id,
            invoice_number: format!(
                "INV-{}-{}",
                input.billing_period.format("%Y%m"),
                short_id(invoice_id)
            ),
            customer_id: input.customer_id,
            usage_id: input.usage_id,
            billing_period: input.billing_period,
            line_items: input.line_items,
            subtotal,
            tax_percentage: input.tax_percentage,
            tax_amount,
            total_amount,
            amount_paid: Money::ZERO,
            amount_due: total_amount,
            status: InvoiceStatus::Unpaid,
            issue_date: input.issue_date,
            due_date: input.due_date,
            version: 0,
            created_utc: now,
            updated_utc: now,
            voided_utc: None,
            void_reason: None,
        };
        invoice.settle_status();
        Ok(invoice)
    }

    /// Record a completed payment against the remaining balance.
    pub fn apply_payment(&mut self, amount: Money) -> Result<(), BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(
                "Payment amount must be greater than zero",
            ));
        }
        if self.status == InvoiceStatus::Void {
            return Err(BillingError::invalid_state(format!(
                "Invoice {} is void and cannot accept payments",
                self.invoice_number
            )));
        }
        if amount > self.amount_due {
            return Err(BillingError::Overpayment {
                amount,
                amount_due: self.amount_due,
            });
        }

        self.amount_paid += amount;
        self.amount_due = self.total_amount - self.amount_paid;
        self.settle_status();
        Ok(())
    }

    /// Undo a previously applied payment.
    pub fn reverse_payment(&mut self, amount: Money) -> Result<(), BillingError> {
        if self.status == InvoiceStatus::Void {
            return Err(BillingError::invalid_state(format!(
                "Invoice {} is void; its payments are frozen",
                self.invoice_number
            )));
        }
        if amount > self.amount_paid {
            return Err(BillingError::invalid_state(format!(
                "Cannot reverse {} from invoice {} with only {} paid",
                amount, self.invoice_number, self.amount_paid
            )));
        }

        self.amount_paid -= amount;
        self.amount_due = self.total_amount - self.amount_paid;
        self.settle_status();
        Ok(())
    }

    /// Time-driven transition; returns whether the status changed.
    pub fn mark_overdue(&mut self, today: NaiveDate) -> bool {
        let eligible = matches!(self.status, InvoiceStatus::Unpaid | InvoiceStatus::Partial);
        if eligible && self.due_date < today && self.amount_due.is_positive() {
            self.status = InvoiceStatus::Overdue;
            true
        } else {
            false
        }
    }

    /// Manual terminal closure. The balance is frozen at zero without the
    /// invoice counting as paid.
    pub fn void(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<(), BillingError> {
        match self.status {
            InvoiceStatus::Void => Err(BillingError::invalid_state(format!(
                "Invoice {} is already void",
                self.invoice_number
            ))),
            InvoiceStatus::Paid => Err(BillingError::invalid_state(format!(
                "Invoice {} is paid and cannot be voided",
                self.invoice_number
            ))),
            InvoiceStatus::Unpaid | InvoiceStatus::Partial | InvoiceStatus::Overdue => {
                self.status = InvoiceStatus::Void;
                self.amount_due = Money::ZERO;
                self.voided_utc = Some(now);
                self.void_reason = reason;
                Ok(())
            }
        }
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        (today - self.due_date).num_days().max(0)
    }

    pub fn is_outstanding(&self) -> bool {
        self.status.is_outstanding()
    }

    fn settle_status(&mut self) {
        self.status = if self.amount_due.is_zero() {
            InvoiceStatus::Paid
        } else if self.status == InvoiceStatus::Overdue {
            InvoiceStatus::Overdue
        } else if self.amount_paid.is_positive() {
            InvoiceStatus::Partial
        } else {
            InvoiceStatus::Unpaid
        };
    }
}

/// First eight hex digits of an id, upper-cased, for human-facing numbers.
pub(crate) fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_uppercase()
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub customer_id: Option<Uuid>,
    pub statuses: Vec<InvoiceStatus>,
    pub issued_from: Option<NaiveDate>,
    pub issued_to: Option<NaiveDate>,
}

impl ListInvoicesFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.customer_id.map_or(true, |id| invoice.customer_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&invoice.status))
            && self.issued_from.map_or(true, |d| invoice.issue_date >= d)
            && self.issued_to.map_or(true, |d| invoice.issue_date <= d)
    }
}
