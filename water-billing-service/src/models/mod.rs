//! Domain models for water-billing-service.

mod actor;
mod invoice;
mod money;
mod payment;
mod report;
mod subscription;
mod usage;
mod water_rate;

pub use actor::{Actor, Role};
pub use invoice::{Invoice, InvoiceStatus, LineItem, ListInvoicesFilter, NewInvoice};
pub use money::Money;
pub use payment::{CreatePayment, Payment, PaymentMethod, PaymentStatus};
pub use report::{
    AgingBucket, AgingBucketKind, AgingReport, DailyCollection, DateRange, HighConsumer,
    MethodBreakdown, MonthlyRevenue, OutstandingInvoice, PaymentSummary, RevenueByType,
    RevenueReport, UsageReport, UsageTrend,
};
pub use subscription::{
    CreateCustomer, CreateSubscriptionType, Customer, CustomerStatus, SubscriptionType,
};
pub use usage::{
    check_meter_reading, first_of_month, max_meter_reading, parse_usage_month, RecordUsage,
    UpdateUsage, WaterUsage,
};
pub use water_rate::{CreateWaterRate, WaterRate};
