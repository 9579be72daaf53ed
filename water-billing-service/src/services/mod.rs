//! Billing core services and their storage backends.

mod accounts;
mod aging_analyzer;
mod billing_run;
mod database;
mod invoice_ledger;
mod locks;
mod memory;
pub mod metrics;
mod overdue_sweep;
mod rate_resolver;
mod store;
mod usage_calculator;

pub use accounts::AccountService;
pub use aging_analyzer::{
    age_invoices, summarize_payments, summarize_revenue, summarize_usage, AgingAnalyzer,
    CustomerPlans, HIGH_CONSUMER_LIMIT,
};
pub use billing_run::{
    BillingRun, BillingRunReport, BillingRunRequest, CustomerOutcome, CustomerRunResult,
};
pub use database::Database;
pub use invoice_ledger::{GenerationOrigin, InvoiceLedger, LedgerSettings, MAX_COMMIT_ATTEMPTS};
pub use locks::{KeyGuard, KeyedLocks};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use overdue_sweep::start_overdue_sweeper;
pub use rate_resolver::{select_rate, RateResolver};
pub use store::{BillingStore, InvoiceCommit, PaymentWrite};
pub use usage_calculator::{AnomalyPolicy, AnomalyRule, UsageCalculator};
