mod common;

use common::{admin, bank_transfer, date, money, operator, payment, TestCore};
use uuid::Uuid;
use rust_decimal::Decimal;
use water_billing_service::models::{AgingBucketKind, DateRange, Money, PaymentMethod};

#[tokio::test]
async fn thirty_five_days_late_lands_in_31_to_60() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;
    core.state
        .ledger
        .apply_payment(bank_transfer(invoice.invoice_id, 100_000, "TRX1"), &operator())
        .await
        .unwrap();

    let report = core
        .state
        .aging
        .build_aging_report(DateRange::default(), date("2024-03-20"))
        .await
        .unwrap();

    assert_eq!(report.total_outstanding, money(160_000));
    assert_eq!(report.total_customers, 1);
    assert_eq!(report.overdue_count, 1);
    assert_eq!(report.invoices.len(), 1);
    let row = &report.invoices[0];
    assert_eq!(row.days_overdue, 35);
    assert_eq!(row.bucket, AgingBucketKind::Days31To60);
    assert_eq!(row.customer_name, "Budi Santoso");
    assert_eq!(row.invoice_number, invoice.invoice_number);

    let bucket = report
        .buckets
        .iter()
        .find(|b| b.bucket == AgingBucketKind::Days31To60)
        .unwrap();
    assert_eq!(bucket.count, 1);
    assert_eq!(bucket.amount, money(160_000));
    assert_eq!(bucket.percentage, Decimal::from(100));
}

#[tokio::test]
async fn buckets_partition_the_outstanding_total() {
    let core = TestCore::new();
    let sub = core.subscription(10_000, 0, 0).await;
    core.rate(sub.subscription_type_id, 3_333, "2023-01-01").await;

    // One invoice per issue date; due 14 days later.
    let issued = [
        "2024-03-15", "2024-03-01", "2024-02-10", "2024-01-20", "2023-12-15", "2023-11-01",
        "2023-10-01",
    ];
    let mut expected_total = Money::ZERO;
    for (i, issue) in issued.iter().enumerate() {
        let customer = core.customer(sub.subscription_type_id).await;
        let usage = core
            .reading(customer.customer_id, "2023-10-01", 7 + i as i64)
            .await;
        let invoice = core.invoice(customer.customer_id, usage.usage_id, issue).await;
        expected_total += invoice.amount_due;
    }

    // Settled and void invoices are excluded.
    let paid = core.scenario_invoice().await;
    core.state
        .ledger
        .apply_payment(payment(paid.invoice_id, 260_000, PaymentMethod::Cash, None), &operator())
        .await
        .unwrap();
    let voided = core.scenario_invoice().await;
    core.state
        .ledger
        .void_invoice(voided.invoice_id, None, &admin())
        .await
        .unwrap();

    let report = core
        .state
        .aging
        .build_aging_report(DateRange::default(), date("2024-03-25"))
        .await
        .unwrap();

    assert_eq!(report.buckets.len(), 5);
    assert_eq!(report.total_outstanding, expected_total);
    let bucket_sum: Money = report.buckets.iter().map(|b| b.amount).sum();
    assert_eq!(bucket_sum, report.total_outstanding);
    let bucket_count: u64 = report.buckets.iter().map(|b| b.count).sum();
    assert_eq!(bucket_count as usize, report.invoices.len());
    assert_eq!(report.invoices.len(), issued.len());

    for bucket in &report.buckets {
        assert!(bucket.count >= 1, "{:?} should not be empty", bucket.bucket);
    }

    // Detail rows are worst first.
    let days: Vec<_> = report.invoices.iter().map(|i| i.days_overdue).collect();
    let mut sorted = days.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(days, sorted);
}

#[tokio::test]
async fn range_filters_on_issue_date() {
    let core = TestCore::new();
    let sub = core.subscription(10_000, 0, 0).await;
    core.rate(sub.subscription_type_id, 1_000, "2023-01-01").await;

    for issue in ["2024-01-10", "2024-02-10", "2024-03-10"] {
        let customer = core.customer(sub.subscription_type_id).await;
        let usage = core.reading(customer.customer_id, "2024-01-01", 5).await;
        core.invoice(customer.customer_id, usage.usage_id, issue).await;
    }

    let report = core
        .state
        .aging
        .build_aging_report(
            DateRange::new(Some(date("2024-02-01")), Some(date("2024-02-29"))),
            date("2024-04-01"),
        )
        .await
        .unwrap();
    assert_eq!(report.invoices.len(), 1);
    assert_eq!(report.total_outstanding, money(15_000));
}

#[tokio::test]
async fn empty_report_has_all_buckets_at_zero() {
    let core = TestCore::new();
    let report = core
        .state
        .aging
        .build_aging_report(DateRange::default(), date("2024-03-20"))
        .await
        .unwrap();
    assert_eq!(report.total_outstanding, Money::ZERO);
    assert_eq!(report.buckets.len(), 5);
    assert!(report
        .buckets
        .iter()
        .all(|b| b.count == 0 && b.amount.is_zero() && b.percentage.is_zero()));
}

#[tokio::test]
async fn payment_summary_counts_completed_only() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;
    let id = invoice.invoice_id;

    core.state
        .ledger
        .apply_payment(bank_transfer(id, 100_000, "TRX1"), &operator())
        .await
        .unwrap();
    core.state
        .ledger
        .apply_payment(payment(id, 60_000, PaymentMethod::Cash, None), &operator())
        .await
        .unwrap();
    let (bounced, _) = core
        .state
        .ledger
        .apply_payment(bank_transfer(id, 40_000, "TRX2"), &operator())
        .await
        .unwrap();
    core.state
        .ledger
        .void_payment(bounced.payment_id, None, &admin())
        .await
        .unwrap();

    let summary = core
        .state
        .aging
        .payment_summary(DateRange::default())
        .await
        .unwrap();
    assert_eq!(summary.total_collected, money(160_000));
    assert_eq!(summary.payment_count, 2);

    let bank = summary
        .by_method
        .iter()
        .find(|m| m.method == PaymentMethod::BankTransfer)
        .unwrap();
    assert_eq!(bank.count, 1);
    assert_eq!(bank.amount, money(100_000));
    assert_eq!(bank.percentage, Decimal::new(6250, 2));

    assert_eq!(summary.daily.len(), 1);
    assert_eq!(summary.daily[0].date, date("2024-02-01"));
    assert_eq!(summary.daily[0].amount, money(160_000));
}

#[tokio::test]
async fn revenue_report_groups_by_plan_and_skips_voids() {
    let core = TestCore::new();
    let kept = core.scenario_invoice().await;

    let sub = core.subscription(10_000, 0, 0).await;
    core.rate(sub.subscription_type_id, 1_000, "2024-01-01").await;
    let small = core.customer(sub.subscription_type_id).await;
    let usage = core.reading(small.customer_id, "2024-01-01", 5).await;
    core.invoice(small.customer_id, usage.usage_id, "2024-01-31").await;

    let cancelled = core.customer(sub.subscription_type_id).await;
    let usage = core.reading(cancelled.customer_id, "2024-01-01", 50).await;
    let voided = core
        .invoice(cancelled.customer_id, usage.usage_id, "2024-01-31")
        .await;
    core.state
        .ledger
        .void_invoice(voided.invoice_id, Some("Meter misread".to_string()), &admin())
        .await
        .unwrap();

    let report = core
        .state
        .aging
        .revenue_report(DateRange::default())
        .await
        .unwrap();
    assert_eq!(report.total_revenue, money(275_000));
    assert_eq!(report.invoice_count, 2);
    assert_eq!(report.monthly.len(), 1);
    assert_eq!(report.monthly[0].month, date("2024-01-01"));

    assert_eq!(report.by_subscription_type.len(), 2);
    let top = &report.by_subscription_type[0];
    assert_eq!(top.revenue, kept.total_amount);
    assert_eq!(top.invoices, 1);
    assert!(top.subscription_type.starts_with("Residential"));
    assert_eq!(report.by_subscription_type[1].subscription_type_id, sub.subscription_type_id);
    assert_eq!(report.by_subscription_type[1].revenue, money(15_000));

    let outside = core
        .state
        .aging
        .revenue_report(DateRange::new(Some(date("2024-02-01")), None))
        .await
        .unwrap();
    assert_eq!(outside.invoice_count, 0);
    assert!(outside.by_subscription_type.is_empty());
}

#[tokio::test]
async fn usage_report_trends_and_high_consumers() {
    let core = TestCore::new();
    let sub = core.subscription(10_000, 0, 0).await;

    let mut customers: Vec<Uuid> = Vec::new();
    for meter_end in [10, 30] {
        let customer = core.customer(sub.subscription_type_id).await;
        core.reading(customer.customer_id, "2024-01-01", meter_end).await;
        customers.push(customer.customer_id);
    }
    // February: 20 m³ and 25 m³.
    core.reading(customers[0], "2024-02-01", 30).await;
    core.reading(customers[1], "2024-02-01", 55).await;

    let report = core
        .state
        .aging
        .usage_report(DateRange::default())
        .await
        .unwrap();
    assert_eq!(report.reading_count, 4);
    assert_eq!(report.total_usage_m3, Decimal::from(85));
    assert_eq!(report.average_usage_m3, Decimal::new(2125, 2));
    assert_eq!(report.trends.len(), 2);
    assert_eq!(report.trends[0].month, date("2024-01-01"));
    assert_eq!(report.trends[0].customer_count, 2);
    assert_eq!(report.trends[1].total_usage_m3, Decimal::from(45));

    let top = &report.high_consumers[0];
    assert_eq!(top.customer_id, customers[1]);
    assert_eq!(top.usage_m3, Decimal::from(30));
    assert_eq!(top.customer_name, "Budi Santoso");

    let february = core
        .state
        .aging
        .usage_report(DateRange::new(Some(date("2024-02-01")), None))
        .await
        .unwrap();
    assert_eq!(february.reading_count, 2);
    assert_eq!(february.trends.len(), 1);
}
