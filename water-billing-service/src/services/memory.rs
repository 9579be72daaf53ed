//! In-process [`BillingStore`], used when no database is configured and by
//! the test suite. A single write lock spans each multi-record operation.

use super::store::{BillingStore, InvoiceCommit, PaymentWrite};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Customer, CustomerStatus, DateRange, Invoice, InvoiceStatus, ListInvoicesFilter, Money,
    Payment, PaymentStatus, SubscriptionType, WaterRate, WaterUsage,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    subscription_types: HashMap<Uuid, SubscriptionType>,
    customers: HashMap<Uuid, Customer>,
    rates: HashMap<Uuid, WaterRate>,
    usages: HashMap<Uuid, WaterUsage>,
    invoices: HashMap<Uuid, Invoice>,
    payments: HashMap<Uuid, Payment>,
}

impl State {
    fn latest_usage(&self, customer_id: Uuid) -> Option<&WaterUsage> {
        self.usages
            .values()
            .filter(|u| u.customer_id == customer_id)
            .max_by_key(|u| u.usage_month)
    }

    fn ensure_unambiguous(&self, rate: &WaterRate) -> BillingResult<()> {
        match self.rates.values().find(|other| rate.is_ambiguous_with(other)) {
            Some(existing) => Err(BillingError::conflict(format!(
                "Active rate {} already takes effect on {} for this subscription type and category",
                existing.rate_id, existing.effective_date
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> BillingResult<()> {
        Ok(())
    }

    async fn insert_subscription_type(
        &self,
        subscription: &SubscriptionType,
    ) -> BillingResult<()> {
        let mut state = self.state.write().await;
        if state
            .subscription_types
            .values()
            .any(|s| s.name.eq_ignore_ascii_case(&subscription.name))
        {
            return Err(BillingError::conflict(format!(
                "Subscription type '{}' already exists",
                subscription.name
            )));
        }
        state
            .subscription_types
            .insert(subscription.subscription_type_id, subscription.clone());
        Ok(())
    }

    async fn get_subscription_type(&self, id: Uuid) -> BillingResult<Option<SubscriptionType>> {
        Ok(self.state.read().await.subscription_types.get(&id).cloned())
    }

    async fn set_subscription_type_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> BillingResult<Option<SubscriptionType>> {
        let mut state = self.state.write().await;
        Ok(state.subscription_types.get_mut(&id).map(|s| {
            s.is_active = active;
            s.clone()
        }))
    }

    async fn insert_customer(&self, customer: &Customer) -> BillingResult<()> {
        let mut state = self.state.write().await;
        if let Some(meter) = &customer.meter_number {
            if state
                .customers
                .values()
                .any(|c| c.meter_number.as_ref() == Some(meter))
            {
                return Err(BillingError::conflict(format!(
                    "Meter number '{}' is already assigned",
                    meter
                )));
            }
        }
        state.customers.insert(customer.customer_id, customer.clone());
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> BillingResult<Option<Customer>> {
        Ok(self.state.read().await.customers.get(&id).cloned())
    }

    async fn list_customers(
        &self,
        status: Option<CustomerStatus>,
    ) -> BillingResult<Vec<Customer>> {
        let state = self.state.read().await;
        let mut customers: Vec<Customer> = state
            .customers
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        customers.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.customer_id.cmp(&b.customer_id))
        });
        Ok(customers)
    }

    async fn set_customer_status(
        &self,
        id: Uuid,
        status: CustomerStatus,
    ) -> BillingResult<Option<Customer>> {
        let mut state = self.state.write().await;
        Ok(state.customers.get_mut(&id).map(|c| {
            c.status = status;
            c.clone()
        }))
    }

    async fn insert_rate(&self, rate: &WaterRate) -> BillingResult<()> {
        let mut state = self.state.write().await;
        state.ensure_unambiguous(rate)?;
        state.rates.insert(rate.rate_id, rate.clone());
        Ok(())
    }

    async fn get_rate(&self, id: Uuid) -> BillingResult<Option<WaterRate>> {
        Ok(self.state.read().await.rates.get(&id).cloned())
    }

    async fn set_rate_active(&self, id: Uuid, active: bool) -> BillingResult<Option<WaterRate>> {
        let mut state = self.state.write().await;
        let Some(mut rate) = state.rates.get(&id).cloned() else {
            return Ok(None);
        };
        rate.active = active;
        if active {
            state.ensure_unambiguous(&rate)?;
        }
        state.rates.insert(id, rate.clone());
        Ok(Some(rate))
    }

    async fn rates_for_subscription(
        &self,
        subscription_type_id: Uuid,
    ) -> BillingResult<Vec<WaterRate>> {
        let state = self.state.read().await;
        Ok(state
            .rates
            .values()
            .filter(|r| r.subscription_type_id == subscription_type_id)
            .cloned()
            .collect())
    }

    async fn insert_usage(
        &self,
        usage: &WaterUsage,
        previous_usage_id: Option<Uuid>,
    ) -> BillingResult<()> {
        let mut state = self.state.write().await;
        if state
            .usages
            .values()
            .any(|u| u.customer_id == usage.customer_id && u.usage_month == usage.usage_month)
        {
            return Err(BillingError::conflict(format!(
                "A reading for {} already exists for this customer",
                usage.usage_month.format("%Y-%m")
            )));
        }
        let latest = state.latest_usage(usage.customer_id).map(|u| u.usage_id);
        if latest != previous_usage_id {
            return Err(BillingError::conflict(
                "Meter readings for this customer changed concurrently; retry",
            ));
        }
        state.usages.insert(usage.usage_id, usage.clone());
        Ok(())
    }

    async fn update_usage(&self, usage: &WaterUsage) -> BillingResult<()> {
        let mut state = self.state.write().await;
        match state.usages.get_mut(&usage.usage_id) {
            None => Err(BillingError::not_found("Usage", usage.usage_id)),
            Some(existing) if existing.is_invoiced() => Err(BillingError::invalid_state(
                "Reading has been invoiced and can no longer change",
            )),
            Some(existing) => {
                *existing = usage.clone();
                Ok(())
            }
        }
    }

    async fn get_usage(&self, id: Uuid) -> BillingResult<Option<WaterUsage>> {
        Ok(self.state.read().await.usages.get(&id).cloned())
    }

    async fn find_usage(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> BillingResult<Option<WaterUsage>> {
        let state = self.state.read().await;
        Ok(state
            .usages
            .values()
            .find(|u| u.customer_id == customer_id && u.usage_month == month)
            .cloned())
    }

    async fn usage_history(
        &self,
        customer_id: Uuid,
        limit: Option<usize>,
    ) -> BillingResult<Vec<WaterUsage>> {
        let state = self.state.read().await;
        let mut history: Vec<WaterUsage> = state
            .usages
            .values()
            .filter(|u| u.customer_id == customer_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.usage_month.cmp(&a.usage_month));
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        Ok(history)
    }

    async fn list_usages(&self, range: DateRange) -> BillingResult<Vec<WaterUsage>> {
        let state = self.state.read().await;
        let mut usages: Vec<WaterUsage> = state
            .usages
            .values()
            .filter(|u| range.contains(u.usage_month))
            .cloned()
            .collect();
        usages.sort_by(|a, b| {
            a.usage_month
                .cmp(&b.usage_month)
                .then(a.customer_id.cmp(&b.customer_id))
        });
        Ok(usages)
    }

    async fn insert_invoice(&self, invoice: &Invoice, usage_charge: Money) -> BillingResult<()> {
        let mut state = self.state.write().await;
        if let Some(usage_id) = invoice.usage_id {
            let usage = state
                .usages
                .get_mut(&usage_id)
                .ok_or_else(|| BillingError::not_found("Usage", usage_id))?;
            if let Some(existing) = usage.invoice_id {
                return Err(BillingError::conflict(format!(
                    "Reading {} is already invoiced by {}",
                    usage_id, existing
                )));
            }
            usage.invoice_id = Some(invoice.invoice_id);
            usage.amount_calculated = usage_charge;
        }
        state.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.state.read().await.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> BillingResult<Vec<Invoice>> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.issue_date
                .cmp(&b.issue_date)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });
        Ok(invoices)
    }

    async fn has_billable_invoices(&self, customer_id: Uuid) -> BillingResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .any(|i| i.customer_id == customer_id && i.status != InvoiceStatus::Void))
    }

    async fn commit_invoice(&self, commit: InvoiceCommit<'_>) -> BillingResult<Invoice> {
        let mut state = self.state.write().await;
        let invoice_id = commit.invoice.invoice_id;
        let stored_version = state
            .invoices
            .get(&invoice_id)
            .map(|i| i.version)
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;
        if stored_version != commit.expected_version {
            return Err(BillingError::StaleVersion(invoice_id));
        }

        match commit.payment {
            Some(PaymentWrite::Insert(payment)) => {
                if state.payments.contains_key(&payment.payment_id) {
                    return Err(BillingError::conflict(format!(
                        "Payment {} already recorded",
                        payment.payment_id
                    )));
                }
                state.payments.insert(payment.payment_id, payment.clone());
            }
            Some(PaymentWrite::Void(payment)) => {
                let stored = state
                    .payments
                    .get_mut(&payment.payment_id)
                    .ok_or_else(|| BillingError::not_found("Payment", payment.payment_id))?;
                if stored.status != PaymentStatus::Completed {
                    return Err(BillingError::invalid_state(format!(
                        "Payment {} is no longer completed",
                        stored.receipt_number
                    )));
                }
                *stored = payment.clone();
            }
            None => {}
        }

        let mut updated = commit.invoice.clone();
        updated.version = commit.expected_version + 1;
        state.invoices.insert(invoice_id, updated.clone());
        Ok(updated)
    }

    async fn get_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_utc);
        Ok(payments)
    }

    async fn list_payments(&self, range: DateRange) -> BillingResult<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| range.contains(p.payment_date))
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.payment_date
                .cmp(&b.payment_date)
                .then(a.created_utc.cmp(&b.created_utc))
        });
        Ok(payments)
    }
}
