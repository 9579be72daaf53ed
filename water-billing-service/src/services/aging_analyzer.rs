//! Outstanding-balance aging and collection summaries.

use super::store::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    AgingBucket, AgingBucketKind, AgingReport, Customer, DailyCollection, DateRange,
    HighConsumer, Invoice, InvoiceStatus, ListInvoicesFilter, MethodBreakdown, Money,
    MonthlyRevenue, OutstandingInvoice, Payment, PaymentMethod, PaymentStatus, PaymentSummary,
    RevenueByType, RevenueReport, UsageReport, UsageTrend, WaterUsage,
};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Partition outstanding invoices into aging buckets as of `as_of`.
///
/// Every bucket is always present, in age order. Bucket amounts are exact
/// sums, so they add up to `total_outstanding` to the minor unit.
pub fn age_invoices(
    invoices: &[Invoice],
    customer_names: &HashMap<Uuid, String>,
    range: DateRange,
    as_of: NaiveDate,
) -> BillingResult<AgingReport> {
    let outstanding: Vec<&Invoice> = invoices
        .iter()
        .filter(|i| i.is_outstanding() && range.contains(i.issue_date))
        .collect();

    let mut totals: HashMap<AgingBucketKind, (u64, Money)> = HashMap::new();
    let mut details = Vec::with_capacity(outstanding.len());
    let mut customers = HashSet::new();
    let mut overdue_count = 0;

    for invoice in outstanding {
        let days_overdue = invoice.days_overdue(as_of);
        let bucket = AgingBucketKind::for_days(days_overdue);
        let entry = totals.entry(bucket).or_insert((0, Money::ZERO));
        entry.0 += 1;
        entry.1 = add_amount(entry.1, invoice.amount_due)?;

        if days_overdue > 0 {
            overdue_count += 1;
        }
        customers.insert(invoice.customer_id);
        details.push(OutstandingInvoice {
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number.clone(),
            customer_id: invoice.customer_id,
            customer_name: customer_names
                .get(&invoice.customer_id)
                .cloned()
                .unwrap_or_default(),
            billing_period: invoice.billing_period,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            total_amount: invoice.total_amount,
            amount_due: invoice.amount_due,
            days_overdue,
            bucket,
        });
    }

    let total_outstanding = Money::checked_sum(totals.values().map(|(_, amount)| *amount))
        .ok_or_else(report_overflow)?;
    let buckets = AgingBucketKind::ALL
        .iter()
        .map(|kind| {
            let (count, amount) = totals.get(kind).copied().unwrap_or((0, Money::ZERO));
            AgingBucket {
                bucket: *kind,
                count,
                amount,
                percentage: amount.share_of(total_outstanding),
            }
        })
        .collect();

    details.sort_by(|a, b| {
        b.days_overdue
            .cmp(&a.days_overdue)
            .then_with(|| a.invoice_number.cmp(&b.invoice_number))
    });

    Ok(AgingReport {
        as_of,
        range,
        total_outstanding,
        total_customers: customers.len() as u64,
        overdue_count,
        buckets,
        invoices: details,
    })
}

/// Collections from completed payments in `range`.
pub fn summarize_payments(
    payments: &[Payment],
    range: DateRange,
) -> BillingResult<PaymentSummary> {
    let completed: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed && range.contains(p.payment_date))
        .collect();
    let total_collected =
        Money::checked_sum(completed.iter().map(|p| p.amount)).ok_or_else(report_overflow)?;

    let mut by_method: BTreeMap<PaymentMethod, (u64, Money)> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, (u64, Money)> = BTreeMap::new();
    for payment in &completed {
        let method = by_method.entry(payment.method).or_insert((0, Money::ZERO));
        method.0 += 1;
        method.1 = add_amount(method.1, payment.amount)?;
        let day = daily.entry(payment.payment_date).or_insert((0, Money::ZERO));
        day.0 += 1;
        day.1 = add_amount(day.1, payment.amount)?;
    }

    Ok(PaymentSummary {
        range,
        total_collected,
        payment_count: completed.len() as u64,
        by_method: by_method
            .into_iter()
            .map(|(method, (count, amount))| MethodBreakdown {
                method,
                count,
                amount,
                percentage: amount.share_of(total_collected),
            })
            .collect(),
        daily: daily
            .into_iter()
            .map(|(date, (count, amount))| DailyCollection {
                date,
                count,
                amount,
            })
            .collect(),
    })
}

/// Largest readings listed in a usage report.
pub const HIGH_CONSUMER_LIMIT: usize = 10;

/// Subscription type a customer is billed under: id and display name.
pub type CustomerPlans = HashMap<Uuid, (Uuid, String)>;

/// Invoiced revenue of non-void invoices issued in `range`, by billing month
/// and by subscription type. Customers missing from `plans` are grouped
/// under a nil subscription type.
pub fn summarize_revenue(
    invoices: &[Invoice],
    plans: &CustomerPlans,
    range: DateRange,
) -> BillingResult<RevenueReport> {
    let billed: Vec<&Invoice> = invoices
        .iter()
        .filter(|i| i.status != InvoiceStatus::Void && range.contains(i.issue_date))
        .collect();
    let total_revenue =
        Money::checked_sum(billed.iter().map(|i| i.total_amount)).ok_or_else(report_overflow)?;

    let mut monthly: BTreeMap<NaiveDate, (u64, Money)> = BTreeMap::new();
    let mut by_type: HashMap<Uuid, (String, u64, Money)> = HashMap::new();
    for invoice in &billed {
        let month = monthly
            .entry(invoice.billing_period)
            .or_insert((0, Money::ZERO));
        month.0 += 1;
        month.1 = add_amount(month.1, invoice.total_amount)?;

        let (plan_id, plan_name) = plans
            .get(&invoice.customer_id)
            .cloned()
            .unwrap_or_else(|| (Uuid::nil(), "unassigned".to_string()));
        let plan = by_type
            .entry(plan_id)
            .or_insert((plan_name, 0, Money::ZERO));
        plan.1 += 1;
        plan.2 = add_amount(plan.2, invoice.total_amount)?;
    }

    let mut by_subscription_type: Vec<RevenueByType> = by_type
        .into_iter()
        .map(|(subscription_type_id, (subscription_type, invoices, revenue))| RevenueByType {
            subscription_type_id,
            subscription_type,
            invoices,
            revenue,
            percentage: revenue.share_of(total_revenue),
        })
        .collect();
    by_subscription_type.sort_by(|a, b| {
        b.revenue
            .cmp(&a.revenue)
            .then_with(|| a.subscription_type.cmp(&b.subscription_type))
    });

    Ok(RevenueReport {
        range,
        total_revenue,
        invoice_count: billed.len() as u64,
        monthly: monthly
            .into_iter()
            .map(|(month, (invoices, revenue))| MonthlyRevenue {
                month,
                invoices,
                revenue,
            })
            .collect(),
        by_subscription_type,
    })
}

/// Consumption of readings whose month falls in `range`: totals, a monthly
/// trend and the largest single readings.
pub fn summarize_usage(
    usages: &[WaterUsage],
    customers: &HashMap<Uuid, Customer>,
    range: DateRange,
) -> BillingResult<UsageReport> {
    let readings: Vec<&WaterUsage> = usages
        .iter()
        .filter(|u| range.contains(u.usage_month))
        .collect();
    let total_usage_m3 = sum_m3(readings.iter().map(|u| u.usage_m3))?;

    let mut months: BTreeMap<NaiveDate, (HashSet<Uuid>, Vec<Decimal>)> = BTreeMap::new();
    for usage in &readings {
        let month = months.entry(usage.usage_month).or_default();
        month.0.insert(usage.customer_id);
        month.1.push(usage.usage_m3);
    }
    let trends = months
        .into_iter()
        .map(|(month, (customers, quantities))| -> BillingResult<UsageTrend> {
            let total = sum_m3(quantities.iter().copied())?;
            Ok(UsageTrend {
                month,
                customer_count: customers.len() as u64,
                total_usage_m3: total,
                average_usage_m3: average_m3(total, quantities.len()),
            })
        })
        .collect::<BillingResult<Vec<_>>>()?;

    let mut largest = readings.clone();
    largest.sort_by(|a, b| {
        b.usage_m3
            .cmp(&a.usage_m3)
            .then_with(|| a.usage_month.cmp(&b.usage_month))
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });
    let high_consumers = largest
        .into_iter()
        .take(HIGH_CONSUMER_LIMIT)
        .map(|usage| {
            let customer = customers.get(&usage.customer_id);
            HighConsumer {
                customer_id: usage.customer_id,
                customer_name: customer.map(|c| c.name.clone()).unwrap_or_default(),
                meter_number: customer.and_then(|c| c.meter_number.clone()),
                month: usage.usage_month,
                usage_m3: usage.usage_m3,
                is_anomaly: usage.is_anomaly,
            }
        })
        .collect();

    Ok(UsageReport {
        range,
        reading_count: readings.len() as u64,
        anomaly_count: readings.iter().filter(|u| u.is_anomaly).count() as u64,
        total_usage_m3,
        average_usage_m3: average_m3(total_usage_m3, readings.len()),
        trends,
        high_consumers,
    })
}

fn sum_m3<I>(quantities: I) -> BillingResult<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    quantities
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, q| acc.checked_add(q))
        .ok_or_else(report_overflow)
}

/// Two decimal places; zero for an empty set.
fn average_m3(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn report_overflow() -> BillingError {
    BillingError::validation("Report totals exceed the money range; narrow the date range")
}

fn add_amount(total: Money, amount: Money) -> BillingResult<Money> {
    total.checked_add(amount).ok_or_else(report_overflow)
}

#[derive(Clone)]
pub struct AgingAnalyzer {
    store: Arc<dyn BillingStore>,
}

impl AgingAnalyzer {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn build_aging_report(
        &self,
        range: DateRange,
        as_of: NaiveDate,
    ) -> BillingResult<AgingReport> {
        let invoices = self
            .store
            .list_invoices(&ListInvoicesFilter {
                statuses: InvoiceStatus::OUTSTANDING.to_vec(),
                issued_from: range.start,
                issued_to: range.end,
                ..Default::default()
            })
            .await?;

        let mut names = HashMap::new();
        for customer_id in invoices.iter().map(|i| i.customer_id) {
            if names.contains_key(&customer_id) {
                continue;
            }
            if let Some(customer) = self.store.get_customer(customer_id).await? {
                names.insert(customer_id, customer.name);
            }
        }

        age_invoices(&invoices, &names, range, as_of)
    }

    #[instrument(skip(self))]
    pub async fn payment_summary(&self, range: DateRange) -> BillingResult<PaymentSummary> {
        let payments = self.store.list_payments(range).await?;
        summarize_payments(&payments, range)
    }

    #[instrument(skip(self))]
    pub async fn revenue_report(&self, range: DateRange) -> BillingResult<RevenueReport> {
        let invoices = self
            .store
            .list_invoices(&ListInvoicesFilter {
                issued_from: range.start,
                issued_to: range.end,
                ..Default::default()
            })
            .await?;

        let mut plans = CustomerPlans::new();
        let mut plan_names: HashMap<Uuid, String> = HashMap::new();
        for customer_id in invoices.iter().map(|i| i.customer_id) {
            if plans.contains_key(&customer_id) {
                continue;
            }
            let Some(customer) = self.store.get_customer(customer_id).await? else {
                continue;
            };
            let plan_id = customer.subscription_type_id;
            if !plan_names.contains_key(&plan_id) {
                let name = self
                    .store
                    .get_subscription_type(plan_id)
                    .await?
                    .map(|s| s.name)
                    .unwrap_or_default();
                plan_names.insert(plan_id, name);
            }
            let name = plan_names.get(&plan_id).cloned().unwrap_or_default();
            plans.insert(customer_id, (plan_id, name));
        }

        summarize_revenue(&invoices, &plans, range)
    }

    #[instrument(skip(self))]
    pub async fn usage_report(&self, range: DateRange) -> BillingResult<UsageReport> {
        let usages = self.store.list_usages(range).await?;

        let mut customers = HashMap::new();
        for customer_id in usages.iter().map(|u| u.customer_id) {
            if customers.contains_key(&customer_id) {
                continue;
            }
            if let Some(customer) = self.store.get_customer(customer_id).await? {
                customers.insert(customer_id, customer);
            }
        }

        summarize_usage(&usages, &customers, range)
    }
}
