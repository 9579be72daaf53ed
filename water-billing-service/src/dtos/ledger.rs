use super::reports::date_range;
use crate::error::BillingError;
use crate::models::{
    CreatePayment, Invoice, InvoiceStatus, ListInvoicesFilter, Money, Payment, PaymentMethod,
};
use crate::services::BillingRunRequest;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    pub customer_id: Uuid,
    pub usage_id: Uuid,
    pub issue_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListInvoicesParams {
    pub customer_id: Option<Uuid>,
    /// Comma separated, e.g. `unpaid,overdue`.
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl TryFrom<ListInvoicesParams> for ListInvoicesFilter {
    type Error = BillingError;

    fn try_from(params: ListInvoicesParams) -> Result<Self, Self::Error> {
        let range = date_range(params.start_date, params.end_date)?;
        let statuses = params
            .status
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::parse::<InvoiceStatus>)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            customer_id: params.customer_id,
            statuses,
            issued_from: range.start,
            issued_to: range.end,
        })
    }
}

/// Invoice plus display strings for receipts and statements.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub total_display: String,
    pub amount_due_display: String,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            total_display: invoice.total_amount.to_string(),
            amount_due_display: invoice.amount_due.to_string(),
            invoice,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VoidRequest {
    #[validate(length(min = 1, max = 500, message = "A void reason is required"))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverdueSweepParams {
    /// Defaults to today.
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct OverdueSweepResponse {
    pub as_of: NaiveDate,
    pub updated: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBillingRunRequest {
    #[validate(length(min = 7, max = 10, message = "Usage month must be YYYY-MM"))]
    pub usage_month: String,
    pub issue_date: Option<NaiveDate>,
    pub customer_ids: Option<Vec<Uuid>>,
}

impl TryFrom<CreateBillingRunRequest> for BillingRunRequest {
    type Error = BillingError;

    fn try_from(req: CreateBillingRunRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            usage_month: crate::models::parse_usage_month(&req.usage_month)?,
            issue_date: req.issue_date.unwrap_or_else(|| Utc::now().date_naive()),
            customer_ids: req.customer_ids,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub invoice_id: Uuid,

    #[validate(range(min = 1, max = 1_000_000_000_000_000i64, message = "Payment amount must be between 1 and 1,000,000,000,000,000"))]
    pub amount: i64,

    /// `cash`, `bank_transfer`, `card`, `e_wallet` or `other`.
    pub method: String,

    #[validate(length(max = 100, message = "Reference number is too long"))]
    pub reference_number: Option<String>,

    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,

    #[validate(length(max = 1000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

impl TryFrom<CreatePaymentRequest> for CreatePayment {
    type Error = BillingError;

    fn try_from(req: CreatePaymentRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            invoice_id: req.invoice_id,
            amount: Money::from_minor(req.amount),
            method: req.method.trim().to_ascii_lowercase().parse::<PaymentMethod>()?,
            reference_number: req.reference_number,
            payment_date: req
                .payment_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            notes: req.notes,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    #[serde(flatten)]
    pub payment: Payment,
    pub amount_display: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            amount_display: payment.amount.to_string(),
            payment,
        }
    }
}

/// Result of applying or voiding a payment: both sides of the change.
#[derive(Debug, Serialize)]
pub struct PaymentResultResponse {
    pub payment: PaymentResponse,
    pub invoice: InvoiceResponse,
}

impl From<(Payment, Invoice)> for PaymentResultResponse {
    fn from((payment, invoice): (Payment, Invoice)) -> Self {
        Self {
            payment: payment.into(),
            invoice: invoice.into(),
        }
    }
}
