//! Invoice issuance, payment application, voids and the overdue sweep.
//!
//! Every mutation of an existing invoice goes through
//! [`InvoiceLedger::commit_with_retry`]: it runs under the invoice's
//! in-process lock, applies the change to a freshly loaded copy and commits
//! it with an optimistic version check. The lock keeps one replica's
//! requests from racing; the version check covers other replicas.

use super::locks::KeyedLocks;
use super::metrics::{INVOICES_GENERATED, OVERDUE_TRANSITIONS, PAYMENTS_TOTAL, VOIDS_TOTAL};
use super::rate_resolver::RateResolver;
use super::store::{BillingStore, InvoiceCommit, PaymentWrite};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Actor, CreatePayment, Invoice, InvoiceStatus, LineItem, ListInvoicesFilter, NewInvoice,
    Payment, PaymentStatus, SubscriptionType, WaterUsage,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const MAX_COMMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSettings {
    pub grace_period_days: i64,
    /// Percent applied to the subtotal after fees (11 means 11%).
    pub tax_percentage: Decimal,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            grace_period_days: 14,
            tax_percentage: Decimal::ZERO,
        }
    }
}

/// Where an invoice generation request came from, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOrigin {
    Single,
    BillingRun,
}

impl GenerationOrigin {
    fn as_str(&self) -> &'static str {
        match self {
            GenerationOrigin::Single => "single",
            GenerationOrigin::BillingRun => "billing_run",
        }
    }
}

enum PaymentChange {
    Insert(Payment),
    Void(Payment),
}

impl PaymentChange {
    fn as_write(&self) -> PaymentWrite<'_> {
        match self {
            PaymentChange::Insert(p) => PaymentWrite::Insert(p),
            PaymentChange::Void(p) => PaymentWrite::Void(p),
        }
    }

    fn into_payment(self) -> Payment {
        match self {
            PaymentChange::Insert(p) | PaymentChange::Void(p) => p,
        }
    }
}

enum Mutation {
    Unchanged,
    Commit(Option<PaymentChange>),
}

#[derive(Clone)]
pub struct InvoiceLedger {
    store: Arc<dyn BillingStore>,
    rates: RateResolver,
    settings: LedgerSettings,
    invoice_locks: KeyedLocks,
    customer_locks: KeyedLocks,
}

impl InvoiceLedger {
    pub fn new(store: Arc<dyn BillingStore>, rates: RateResolver, settings: LedgerSettings) -> Self {
        Self {
            store,
            rates,
            settings,
            invoice_locks: KeyedLocks::new(),
            customer_locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    // -------------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------------

    /// Price a reading into an invoice. The registration fee is charged only
    /// when the customer has no invoice that is not void.
    #[instrument(skip(self, usage, subscription), fields(customer_id = %usage.customer_id, usage_id = %usage.usage_id))]
    pub async fn generate(
        &self,
        usage: &WaterUsage,
        subscription: &SubscriptionType,
        issue_date: NaiveDate,
        origin: GenerationOrigin,
    ) -> BillingResult<Invoice> {
        if usage.is_invoiced() {
            return Err(BillingError::conflict(format!(
                "Reading {} is already invoiced",
                usage.usage_id
            )));
        }

        let rate = self
            .rates
            .resolve(subscription.subscription_type_id, usage.usage_month, None)
            .await?;

        // Serialise per customer so the first-invoice decision is stable.
        let _guard = self.customer_locks.lock(usage.customer_id).await;
        let first_invoice = !self.store.has_billable_invoices(usage.customer_id).await?;

        let mut line_items = Vec::with_capacity(4);
        if first_invoice && subscription.registration_fee.is_positive() {
            line_items.push(LineItem::fee("Registration fee", subscription.registration_fee));
        }
        if subscription.monthly_fee.is_positive() {
            line_items.push(LineItem::fee("Monthly fee", subscription.monthly_fee));
        }
        if subscription.maintenance_fee.is_positive() {
            line_items.push(LineItem::fee("Maintenance fee", subscription.maintenance_fee));
        }
        let usage_line = LineItem::metered(
            format!("Water usage {}", usage.usage_month.format("%Y-%m")),
            usage.usage_m3,
            rate.amount_per_m3,
        )?;
        let usage_charge = usage_line.amount;
        line_items.push(usage_line);

        let invoice = Invoice::issue(
            NewInvoice {
                customer_id: usage.customer_id,
                usage_id: Some(usage.usage_id),
                billing_period: usage.usage_month,
                line_items,
                tax_percentage: self.settings.tax_percentage,
                issue_date,
                due_date: issue_date + Duration::days(self.settings.grace_period_days),
            },
            Utc::now(),
        )?;
        self.store.insert_invoice(&invoice, usage_charge).await?;

        INVOICES_GENERATED
            .with_label_values(&[origin.as_str()])
            .inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            rate_id = %rate.rate_id,
            total_amount = %invoice.total_amount,
            first_invoice,
            "Invoice generated"
        );
        Ok(invoice)
    }

    /// Load the customer, its subscription type and the reading, then
    /// [`InvoiceLedger::generate`].
    pub async fn generate_for_usage(
        &self,
        customer_id: Uuid,
        usage_id: Uuid,
        issue_date: Option<NaiveDate>,
    ) -> BillingResult<Invoice> {
        let customer = self
            .store
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Customer", customer_id))?;
        let usage = self
            .store
            .get_usage(usage_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Usage", usage_id))?;
        if usage.customer_id != customer.customer_id {
            return Err(BillingError::validation(format!(
                "Reading {} does not belong to customer {}",
                usage_id, customer_id
            )));
        }
        let subscription = self
            .store
            .get_subscription_type(customer.subscription_type_id)
            .await?
            .ok_or_else(|| {
                BillingError::not_found("Subscription type", customer.subscription_type_id)
            })?;

        let issue_date = issue_date.unwrap_or_else(|| Utc::now().date_naive());
        self.generate(&usage, &subscription, issue_date, GenerationOrigin::Single)
            .await
    }

    // -------------------------------------------------------------------------
    // Payments and voids
    // -------------------------------------------------------------------------

    /// Record a completed payment and apply it to the invoice atomically.
    #[instrument(skip(self, input, actor), fields(invoice_id = %input.invoice_id, amount = %input.amount, method = input.method.as_str(), operator = %actor.operator_id))]
    pub async fn apply_payment(
        &self,
        input: CreatePayment,
        actor: &Actor,
    ) -> BillingResult<(Payment, Invoice)> {
        let method = input.method;
        let result = self
            .commit_with_retry(input.invoice_id, |invoice| {
                let payment = Payment::completed(
                    input.clone(),
                    invoice.customer_id,
                    &actor.operator_id,
                    Utc::now(),
                )?;
                invoice.apply_payment(payment.amount)?;
                Ok(Mutation::Commit(Some(PaymentChange::Insert(payment))))
            })
            .await;

        match result {
            Ok(Some((invoice, Some(payment)))) => {
                PAYMENTS_TOTAL
                    .with_label_values(&[method.as_str(), "completed"])
                    .inc();
                info!(
                    payment_id = %payment.payment_id,
                    receipt_number = %payment.receipt_number,
                    status = invoice.status.as_str(),
                    amount_due = %invoice.amount_due,
                    "Payment applied"
                );
                Ok((payment, invoice))
            }
            Ok(_) => Err(BillingError::Storage(anyhow::anyhow!(
                "Payment commit produced no payment"
            ))),
            Err(e) => {
                PAYMENTS_TOTAL
                    .with_label_values(&[method.as_str(), "rejected"])
                    .inc();
                Err(e)
            }
        }
    }

    /// Void a completed payment and reverse it from its invoice.
    #[instrument(skip(self, reason, actor), fields(operator = %actor.operator_id))]
    pub async fn void_payment(
        &self,
        payment_id: Uuid,
        reason: Option<String>,
        actor: &Actor,
    ) -> BillingResult<(Payment, Invoice)> {
        let payment = self.get_payment(payment_id).await?;
        if payment.status != PaymentStatus::Completed {
            return Err(BillingError::invalid_state(format!(
                "Payment {} is {} and cannot be voided",
                payment.receipt_number,
                payment.status.as_str()
            )));
        }

        let result = self
            .commit_with_retry(payment.invoice_id, |invoice| {
                let mut voided = payment.clone();
                voided.void(reason.clone(), &actor.operator_id, Utc::now())?;
                invoice.reverse_payment(voided.amount)?;
                Ok(Mutation::Commit(Some(PaymentChange::Void(voided))))
            })
            .await?;

        match result {
            Some((invoice, Some(voided))) => {
                VOIDS_TOTAL.with_label_values(&["payment"]).inc();
                info!(
                    payment_id = %payment_id,
                    invoice_id = %invoice.invoice_id,
                    status = invoice.status.as_str(),
                    amount_due = %invoice.amount_due,
                    "Payment voided"
                );
                Ok((voided, invoice))
            }
            _ => Err(BillingError::Storage(anyhow::anyhow!(
                "Payment void produced no payment"
            ))),
        }
    }

    /// Close an unpaid, partial or overdue invoice without payment.
    #[instrument(skip(self, reason, actor), fields(operator = %actor.operator_id))]
    pub async fn void_invoice(
        &self,
        invoice_id: Uuid,
        reason: Option<String>,
        actor: &Actor,
    ) -> BillingResult<Invoice> {
        let result = self
            .commit_with_retry(invoice_id, |invoice| {
                invoice.void(reason.clone(), Utc::now())?;
                Ok(Mutation::Commit(None))
            })
            .await?;

        let invoice = result
            .map(|(invoice, _)| invoice)
            .ok_or_else(|| BillingError::Storage(anyhow::anyhow!("Invoice void was not committed")))?;
        VOIDS_TOTAL.with_label_values(&["invoice"]).inc();
        info!(invoice_id = %invoice_id, "Invoice voided");
        Ok(invoice)
    }

    /// Move every unpaid or partial invoice past its due date to overdue.
    /// Returns how many invoices changed.
    #[instrument(skip(self))]
    pub async fn refresh_overdue(&self, today: NaiveDate, trigger: &str) -> BillingResult<u64> {
        let candidates = self
            .store
            .list_invoices(&ListInvoicesFilter {
                statuses: vec![InvoiceStatus::Unpaid, InvoiceStatus::Partial],
                ..Default::default()
            })
            .await?;

        let mut transitioned = 0;
        for candidate in candidates
            .into_iter()
            .filter(|i| i.due_date < today && i.amount_due.is_positive())
        {
            let result = self
                .commit_with_retry(candidate.invoice_id, |invoice| {
                    Ok(if invoice.mark_overdue(today) {
                        Mutation::Commit(None)
                    } else {
                        Mutation::Unchanged
                    })
                })
                .await;
            match result {
                Ok(Some(_)) => transitioned += 1,
                Ok(None) => {}
                Err(e) => warn!(
                    invoice_id = %candidate.invoice_id,
                    error = %e,
                    "Failed to mark invoice overdue"
                ),
            }
        }

        if transitioned > 0 {
            OVERDUE_TRANSITIONS
                .with_label_values(&[trigger])
                .inc_by(transitioned as f64);
        }
        info!(transitioned, %today, "Overdue sweep finished");
        Ok(transitioned)
    }

    async fn commit_with_retry<F>(
        &self,
        invoice_id: Uuid,
        mut mutate: F,
    ) -> BillingResult<Option<(Invoice, Option<Payment>)>>
    where
        F: FnMut(&mut Invoice) -> BillingResult<Mutation> + Send,
    {
        let _guard = self.invoice_locks.lock(invoice_id).await;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let current = self.get_invoice(invoice_id).await?;
            let expected_version = current.version;
            let mut next = current;

            let change = match mutate(&mut next)? {
                Mutation::Unchanged => return Ok(None),
                Mutation::Commit(change) => change,
            };
            next.updated_utc = Utc::now();

            let committed = self
                .store
                .commit_invoice(InvoiceCommit {
                    invoice: &next,
                    expected_version,
                    payment: change.as_ref().map(PaymentChange::as_write),
                })
                .await;

            match committed {
                Ok(stored) => return Ok(Some((stored, change.map(PaymentChange::into_payment)))),
                Err(BillingError::StaleVersion(_)) => {
                    warn!(invoice_id = %invoice_id, attempt, "Invoice changed concurrently; retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(BillingError::conflict(format!(
            "Invoice {} kept changing concurrently; retry later",
            invoice_id
        )))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn get_invoice(&self, invoice_id: Uuid) -> BillingResult<Invoice> {
        self.store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }

    pub async fn list_invoices(&self, filter: &ListInvoicesFilter) -> BillingResult<Vec<Invoice>> {
        self.store.list_invoices(filter).await
    }

    pub async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        self.get_invoice(invoice_id).await?;
        self.store.payments_for_invoice(invoice_id).await
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> BillingResult<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Payment", payment_id))
    }

    /// Unpaid, partial and overdue invoices, optionally for one customer.
    pub async fn outstanding_invoices(&self, customer_id: Option<Uuid>) -> BillingResult<Vec<Invoice>> {
        if let Some(id) = customer_id {
            self.store
                .get_customer(id)
                .await?
                .ok_or_else(|| BillingError::not_found("Customer", id))?;
        }
        self.store
            .list_invoices(&ListInvoicesFilter {
                customer_id,
                statuses: InvoiceStatus::OUTSTANDING.to_vec(),
                ..Default::default()
            })
            .await
    }
}
