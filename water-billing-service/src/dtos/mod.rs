//! Request and response bodies for the REST surface. Money travels as
//! integer minor units; dates as `YYYY-MM-DD`.

mod accounts;
mod ledger;
mod metering;
mod reports;

pub use accounts::{CreateCustomerRequest, CreateSubscriptionTypeRequest, CustomerStatusRequest};
pub use ledger::{
    CreateBillingRunRequest, CreatePaymentRequest, GenerateInvoiceRequest, InvoiceResponse,
    ListInvoicesParams, OverdueSweepParams, OverdueSweepResponse, PaymentResponse,
    PaymentResultResponse, VoidRequest,
};
pub use metering::{CreateWaterRateRequest, RecordUsageRequest, ResolveRateParams, UpdateUsageRequest};
pub use reports::{date_range, OutstandingReportParams, ReportRangeParams};
