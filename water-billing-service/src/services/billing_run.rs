//! Monthly batch invoice generation across customers.

use super::invoice_ledger::{GenerationOrigin, InvoiceLedger};
use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{Actor, Customer, CustomerStatus, Invoice, Money};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BillingRunRequest {
    pub usage_month: NaiveDate,
    pub issue_date: NaiveDate,
    /// Restrict the run to these customers; all active customers otherwise.
    pub customer_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CustomerOutcome {
    Generated {
        invoice_id: Uuid,
        invoice_number: String,
        total_amount: Money,
    },
    Skipped {
        reason: String,
    },
    Failed {
        kind: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRunResult {
    pub customer_id: Uuid,
    #[serde(flatten)]
    pub outcome: CustomerOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingRunReport {
    pub usage_month: NaiveDate,
    pub issue_date: NaiveDate,
    pub generated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total_billed: Money,
    pub results: Vec<CustomerRunResult>,
}

impl BillingRunReport {
    fn from_results(request: &BillingRunRequest, mut results: Vec<CustomerRunResult>) -> Self {
        results.sort_by_key(|r| r.customer_id);
        let mut report = Self {
            usage_month: request.usage_month,
            issue_date: request.issue_date,
            generated: 0,
            skipped: 0,
            failed: 0,
            total_billed: Money::ZERO,
            results: Vec::new(),
        };
        for result in &results {
            match &result.outcome {
                CustomerOutcome::Generated { total_amount, .. } => {
                    report.generated += 1;
                    report.total_billed = report.total_billed.saturating_add(*total_amount);
                }
                CustomerOutcome::Skipped { .. } => report.skipped += 1,
                CustomerOutcome::Failed { .. } => report.failed += 1,
            }
        }
        report.results = results;
        report
    }
}

#[derive(Clone)]
pub struct BillingRun {
    store: Arc<dyn BillingStore>,
    ledger: InvoiceLedger,
    concurrency: usize,
}

impl BillingRun {
    pub fn new(store: Arc<dyn BillingStore>, ledger: InvoiceLedger, concurrency: usize) -> Self {
        Self {
            store,
            ledger,
            concurrency: concurrency.max(1),
        }
    }

    /// Generate invoices for every eligible customer. Customers are
    /// independent; one failure never aborts the others.
    #[instrument(skip(self, request, actor), fields(usage_month = %request.usage_month, operator = %actor.operator_id))]
    pub async fn run(
        &self,
        request: BillingRunRequest,
        actor: &Actor,
    ) -> BillingResult<BillingRunReport> {
        let targets: Vec<Result<Customer, Uuid>> = match &request.customer_ids {
            Some(ids) => {
                let mut seen = HashSet::with_capacity(ids.len());
                let mut targets = Vec::with_capacity(ids.len());
                for id in ids.iter().filter(|id| seen.insert(**id)) {
                    targets.push(self.store.get_customer(*id).await?.ok_or(*id));
                }
                targets
            }
            None => self
                .store
                .list_customers(Some(CustomerStatus::Active))
                .await?
                .into_iter()
                .map(Ok)
                .collect(),
        };

        info!(customers = targets.len(), concurrency = self.concurrency, "Billing run started");

        let results: Vec<CustomerRunResult> = stream::iter(targets)
            .map(|target| {
                let request = &request;
                async move {
                    match target {
                        Ok(customer) => CustomerRunResult {
                            customer_id: customer.customer_id,
                            outcome: self.bill_customer(&customer, request).await,
                        },
                        Err(customer_id) => CustomerRunResult {
                            customer_id,
                            outcome: failed(&BillingError::not_found("Customer", customer_id)),
                        },
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let report = BillingRunReport::from_results(&request, results);
        info!(
            generated = report.generated,
            skipped = report.skipped,
            failed = report.failed,
            total_billed = %report.total_billed,
            "Billing run finished"
        );
        Ok(report)
    }

    async fn bill_customer(&self, customer: &Customer, request: &BillingRunRequest) -> CustomerOutcome {
        match self.try_bill_customer(customer, request).await {
            Ok(invoice) => CustomerOutcome::Generated {
                invoice_id: invoice.invoice_id,
                invoice_number: invoice.invoice_number,
                total_amount: invoice.total_amount,
            },
            Err(RunSkip::Skip(reason)) => CustomerOutcome::Skipped { reason },
            Err(RunSkip::Fail(e)) => {
                warn!(customer_id = %customer.customer_id, error = %e, "Billing failed for customer");
                failed(&e)
            }
        }
    }

    async fn try_bill_customer(
        &self,
        customer: &Customer,
        request: &BillingRunRequest,
    ) -> Result<Invoice, RunSkip> {
        if customer.status != CustomerStatus::Active {
            return Err(RunSkip::Skip(format!(
                "Customer is {}",
                customer.status.as_str()
            )));
        }
        let usage = self
            .store
            .find_usage(customer.customer_id, request.usage_month)
            .await?
            .ok_or_else(|| {
                RunSkip::Skip(format!(
                    "No reading for {}",
                    request.usage_month.format("%Y-%m")
                ))
            })?;
        if usage.is_invoiced() {
            return Err(RunSkip::Skip("Reading already invoiced".to_string()));
        }
        let subscription = self
            .store
            .get_subscription_type(customer.subscription_type_id)
            .await?
            .ok_or_else(|| {
                BillingError::not_found("Subscription type", customer.subscription_type_id)
            })?;

        let invoice = self
            .ledger
            .generate(&usage, &subscription, request.issue_date, GenerationOrigin::BillingRun)
            .await?;
        Ok(invoice)
    }
}

enum RunSkip {
    Skip(String),
    Fail(BillingError),
}

impl From<BillingError> for RunSkip {
    fn from(e: BillingError) -> Self {
        RunSkip::Fail(e)
    }
}

fn failed(e: &BillingError) -> CustomerOutcome {
    CustomerOutcome::Failed {
        kind: e.kind().as_str(),
        message: e.to_string(),
    }
}
