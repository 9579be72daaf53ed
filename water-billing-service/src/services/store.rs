//! Persistence seam for the billing core.
//!
//! Every method that mutates more than one record is atomic in the backing
//! store: either all of its writes land or none do.

use crate::error::BillingResult;
use crate::models::{
    Customer, CustomerStatus, DateRange, Invoice, ListInvoicesFilter, Money, Payment,
    SubscriptionType, WaterRate, WaterUsage,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Payment side of an invoice commit.
#[derive(Debug, Clone, Copy)]
pub enum PaymentWrite<'a> {
    /// New completed payment.
    Insert(&'a Payment),
    /// Previously completed payment now voided.
    Void(&'a Payment),
}

/// A mutated invoice plus the payment write that caused it.
///
/// The commit succeeds only if the stored invoice still carries
/// `expected_version`; otherwise it fails with `BillingError::StaleVersion`
/// and nothing is written.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceCommit<'a> {
    pub invoice: &'a Invoice,
    pub expected_version: i64,
    pub payment: Option<PaymentWrite<'a>>,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> BillingResult<()>;

    // Subscription types

    async fn insert_subscription_type(&self, subscription: &SubscriptionType)
        -> BillingResult<()>;
    async fn get_subscription_type(&self, id: Uuid) -> BillingResult<Option<SubscriptionType>>;
    /// Returns the updated row, `None` when it does not exist.
    async fn set_subscription_type_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> BillingResult<Option<SubscriptionType>>;

    // Customers

    async fn insert_customer(&self, customer: &Customer) -> BillingResult<()>;
    async fn get_customer(&self, id: Uuid) -> BillingResult<Option<Customer>>;
    async fn list_customers(&self, status: Option<CustomerStatus>) -> BillingResult<Vec<Customer>>;
    /// Returns the updated row, `None` when it does not exist.
    async fn set_customer_status(
        &self,
        id: Uuid,
        status: CustomerStatus,
    ) -> BillingResult<Option<Customer>>;

    // Water rates

    /// Fails with a conflict if an active rate with the same
    /// `(subscription type, category, effective date)` exists.
    async fn insert_rate(&self, rate: &WaterRate) -> BillingResult<()>;
    async fn get_rate(&self, id: Uuid) -> BillingResult<Option<WaterRate>>;
    /// Same conflict rule as [`BillingStore::insert_rate`] when activating.
    async fn set_rate_active(&self, id: Uuid, active: bool) -> BillingResult<Option<WaterRate>>;
    async fn rates_for_subscription(&self, subscription_type_id: Uuid)
        -> BillingResult<Vec<WaterRate>>;

    // Usage readings

    /// Insert a reading chained onto `previous_usage_id`, which must still be
    /// the customer's latest reading. A second reading for the same month is
    /// a conflict.
    async fn insert_usage(
        &self,
        usage: &WaterUsage,
        previous_usage_id: Option<Uuid>,
    ) -> BillingResult<()>;
    /// Overwrite a reading that no invoice references yet.
    async fn update_usage(&self, usage: &WaterUsage) -> BillingResult<()>;
    async fn get_usage(&self, id: Uuid) -> BillingResult<Option<WaterUsage>>;
    async fn find_usage(&self, customer_id: Uuid, month: NaiveDate)
        -> BillingResult<Option<WaterUsage>>;
    /// Readings newest month first, at most `limit` when given.
    async fn usage_history(
        &self,
        customer_id: Uuid,
        limit: Option<usize>,
    ) -> BillingResult<Vec<WaterUsage>>;
    /// Readings of every customer whose month falls in `range`, oldest first.
    async fn list_usages(&self, range: DateRange) -> BillingResult<Vec<WaterUsage>>;

    // Invoices and payments

    /// Insert the invoice and, when it prices a reading, link that reading
    /// and record its usage charge. Fails with a conflict if the reading is
    /// already invoiced.
    async fn insert_invoice(&self, invoice: &Invoice, usage_charge: Money) -> BillingResult<()>;
    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>>;
    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> BillingResult<Vec<Invoice>>;
    /// Whether the customer has any invoice that is not void.
    async fn has_billable_invoices(&self, customer_id: Uuid) -> BillingResult<bool>;
    /// Persist an invoice mutation and its payment write; returns the stored
    /// invoice with its bumped version.
    async fn commit_invoice(&self, commit: InvoiceCommit<'_>) -> BillingResult<Invoice>;
    async fn get_payment(&self, id: Uuid) -> BillingResult<Option<Payment>>;
    async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>>;
    /// Payments whose payment date falls in `range`, oldest first.
    async fn list_payments(&self, range: DateRange) -> BillingResult<Vec<Payment>>;
}
