//! Read models produced by the aging analyzer.

use super::{Money, PaymentMethod};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive date range; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Day-overdue ranges for collections reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgingBucketKind {
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "1-30")]
    Days1To30,
    #[serde(rename = "31-60")]
    Days31To60,
    #[serde(rename = "61-90")]
    Days61To90,
    #[serde(rename = "90+")]
    Over90,
}

impl AgingBucketKind {
    pub const ALL: [AgingBucketKind; 5] = [
        AgingBucketKind::Current,
        AgingBucketKind::Days1To30,
        AgingBucketKind::Days31To60,
        AgingBucketKind::Days61To90,
        AgingBucketKind::Over90,
    ];

    pub fn for_days(days_overdue: i64) -> Self {
        match days_overdue {
            i64::MIN..=0 => AgingBucketKind::Current,
            1..=30 => AgingBucketKind::Days1To30,
            31..=60 => AgingBucketKind::Days31To60,
            61..=90 => AgingBucketKind::Days61To90,
            _ => AgingBucketKind::Over90,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgingBucketKind::Current => "current",
            AgingBucketKind::Days1To30 => "1-30",
            AgingBucketKind::Days31To60 => "31-60",
            AgingBucketKind::Days61To90 => "61-90",
            AgingBucketKind::Over90 => "90+",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingBucket {
    pub bucket: AgingBucketKind,
    pub count: u64,
    pub amount: Money,
    /// Share of the report's total outstanding, two decimal places.
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutstandingInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub billing_period: NaiveDate,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Money,
    pub amount_due: Money,
    pub days_overdue: i64,
    pub bucket: AgingBucketKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingReport {
    pub as_of: NaiveDate,
    pub range: DateRange,
    pub total_outstanding: Money,
    pub total_customers: u64,
    pub overdue_count: u64,
    pub buckets: Vec<AgingBucket>,
    pub invoices: Vec<OutstandingInvoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodBreakdown {
    pub method: PaymentMethod,
    pub count: u64,
    pub amount: Money,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCollection {
    pub date: NaiveDate,
    pub count: u64,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub range: DateRange,
    pub total_collected: Money,
    pub payment_count: u64,
    pub by_method: Vec<MethodBreakdown>,
    pub daily: Vec<DailyCollection>,
}

/// Invoiced revenue for one billing month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRevenue {
    /// First day of the billed month.
    pub month: NaiveDate,
    pub invoices: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueByType {
    pub subscription_type_id: Uuid,
    pub subscription_type: String,
    pub invoices: u64,
    pub revenue: Money,
    pub percentage: Decimal,
}

/// Billed (not collected) amounts of every non-void invoice issued in range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueReport {
    pub range: DateRange,
    pub total_revenue: Money,
    pub invoice_count: u64,
    pub monthly: Vec<MonthlyRevenue>,
    pub by_subscription_type: Vec<RevenueByType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageTrend {
    pub month: NaiveDate,
    pub customer_count: u64,
    pub total_usage_m3: Decimal,
    pub average_usage_m3: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighConsumer {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub meter_number: Option<String>,
    pub month: NaiveDate,
    pub usage_m3: Decimal,
    pub is_anomaly: bool,
}

/// Consumption over readings whose month falls in range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub range: DateRange,
    pub reading_count: u64,
    pub anomaly_count: u64,
    pub total_usage_m3: Decimal,
    pub average_usage_m3: Decimal,
    pub trends: Vec<UsageTrend>,
    /// Largest single readings, biggest first.
    pub high_consumers: Vec<HighConsumer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(AgingBucketKind::for_days(-5), AgingBucketKind::Current);
        assert_eq!(AgingBucketKind::for_days(0), AgingBucketKind::Current);
        assert_eq!(AgingBucketKind::for_days(1), AgingBucketKind::Days1To30);
        assert_eq!(AgingBucketKind::for_days(30), AgingBucketKind::Days1To30);
        assert_eq!(AgingBucketKind::for_days(31), AgingBucketKind::Days31To60);
        assert_eq!(AgingBucketKind::for_days(35), AgingBucketKind::Days31To60);
        assert_eq!(AgingBucketKind::for_days(60), AgingBucketKind::Days31To60);
        assert_eq!(AgingBucketKind::for_days(61), AgingBucketKind::Days61To90);
        assert_eq!(AgingBucketKind::for_days(90), AgingBucketKind::Days61To90);
        assert_eq!(AgingBucketKind::for_days(91), AgingBucketKind::Over90);
    }

    #[test]
    fn open_range_contains_everything() {
        let range = DateRange::default();
        assert!(range.contains("1999-01-01".parse().unwrap()));

        let january = DateRange::new(
            Some("2024-01-01".parse().unwrap()),
            Some("2024-01-31".parse().unwrap()),
        );
        assert!(january.contains("2024-01-31".parse().unwrap()));
        assert!(!january.contains("2024-02-01".parse().unwrap()));
    }

    #[test]
    fn bucket_labels_match_serde() {
        for kind in AgingBucketKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.label()));
        }
    }
}
