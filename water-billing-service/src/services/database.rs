//! PostgreSQL [`BillingStore`].

use super::metrics::DB_QUERY_DURATION;
use super::store::{BillingStore, InvoiceCommit, PaymentWrite};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Customer, CustomerStatus, DateRange, Invoice, LineItem, ListInvoicesFilter, Money, Payment,
    SubscriptionType, WaterRate, WaterUsage,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

fn storage(context: &str, e: sqlx::Error) -> BillingError {
    BillingError::Storage(anyhow::anyhow!("{}: {}", context, e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn corrupt(entity: &str, id: Uuid, e: BillingError) -> BillingError {
    BillingError::Storage(anyhow::anyhow!("Corrupt {} row {}: {}", entity, id, e))
}

// -----------------------------------------------------------------------------
// Row types
// -----------------------------------------------------------------------------

#[derive(FromRow)]
struct SubscriptionTypeRow {
    subscription_type_id: Uuid,
    name: String,
    description: Option<String>,
    monthly_fee: i64,
    registration_fee: i64,
    maintenance_fee: i64,
    late_fee_percentage: Decimal,
    is_active: bool,
    created_utc: DateTime<Utc>,
}

impl From<SubscriptionTypeRow> for SubscriptionType {
    fn from(row: SubscriptionTypeRow) -> Self {
        Self {
            subscription_type_id: row.subscription_type_id,
            name: row.name,
            description: row.description,
            monthly_fee: Money::from_minor(row.monthly_fee),
            registration_fee: Money::from_minor(row.registration_fee),
            maintenance_fee: Money::from_minor(row.maintenance_fee),
            late_fee_percentage: row.late_fee_percentage,
            is_active: row.is_active,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct CustomerRow {
    customer_id: Uuid,
    name: String,
    meter_number: Option<String>,
    subscription_type_id: Uuid,
    status: String,
    registration_date: NaiveDate,
    created_utc: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = BillingError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row
                .status
                .parse()
                .map_err(|e| corrupt("customer", row.customer_id, e))?,
            customer_id: row.customer_id,
            name: row.name,
            meter_number: row.meter_number,
            subscription_type_id: row.subscription_type_id,
            registration_date: row.registration_date,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct WaterRateRow {
    rate_id: Uuid,
    subscription_type_id: Uuid,
    category_id: Option<Uuid>,
    amount_per_m3: i64,
    effective_date: NaiveDate,
    active: bool,
    description: Option<String>,
    created_utc: DateTime<Utc>,
}

impl From<WaterRateRow> for WaterRate {
    fn from(row: WaterRateRow) -> Self {
        Self {
            rate_id: row.rate_id,
            subscription_type_id: row.subscription_type_id,
            category_id: row.category_id,
            amount_per_m3: Money::from_minor(row.amount_per_m3),
            effective_date: row.effective_date,
            active: row.active,
            description: row.description,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct WaterUsageRow {
    usage_id: Uuid,
    customer_id: Uuid,
    usage_month: NaiveDate,
    meter_start: Decimal,
    meter_end: Decimal,
    usage_m3: Decimal,
    amount_calculated: i64,
    is_anomaly: bool,
    notes: Option<String>,
    invoice_id: Option<Uuid>,
    recorded_by: String,
    recorded_utc: DateTime<Utc>,
}

impl From<WaterUsageRow> for WaterUsage {
    fn from(row: WaterUsageRow) -> Self {
        Self {
            usage_id: row.usage_id,
            customer_id: row.customer_id,
            usage_month: row.usage_month,
            meter_start: row.meter_start,
            meter_end: row.meter_end,
            usage_m3: row.usage_m3,
            amount_calculated: Money::from_minor(row.amount_calculated),
            is_anomaly: row.is_anomaly,
            notes: row.notes,
            invoice_id: row.invoice_id,
            recorded_by: row.recorded_by,
            recorded_utc: row.recorded_utc,
        }
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    invoice_number: String,
    customer_id: Uuid,
    usage_id: Option<Uuid>,
    billing_period: NaiveDate,
    line_items: Json<Vec<LineItem>>,
    subtotal: i64,
    tax_percentage: Decimal,
    tax_amount: i64,
    total_amount: i64,
    amount_paid: i64,
    amount_due: i64,
    status: String,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    version: i64,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
    voided_utc: Option<DateTime<Utc>>,
    void_reason: Option<String>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row
                .status
                .parse()
                .map_err(|e| corrupt("invoice", row.invoice_id, e))?,
            invoice_id: row.invoice_id,
            invoice_number: row.invoice_number,
            customer_id: row.customer_id,
            usage_id: row.usage_id,
            billing_period: row.billing_period,
            line_items: row.line_items.0,
            subtotal: Money::from_minor(row.subtotal),
            tax_percentage: row.tax_percentage,
            tax_amount: Money::from_minor(row.tax_amount),
            total_amount: Money::from_minor(row.total_amount),
            amount_paid: Money::from_minor(row.amount_paid),
            amount_due: Money::from_minor(row.amount_due),
            issue_date: row.issue_date,
            due_date: row.due_date,
            version: row.version,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
            voided_utc: row.voided_utc,
            void_reason: row.void_reason,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    receipt_number: String,
    invoice_id: Uuid,
    customer_id: Uuid,
    amount: i64,
    method: String,
    payment_date: NaiveDate,
    reference_number: Option<String>,
    status: String,
    notes: Option<String>,
    recorded_by: String,
    created_utc: DateTime<Utc>,
    voided_utc: Option<DateTime<Utc>>,
    void_reason: Option<String>,
    voided_by: Option<String>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            method: row
                .method
                .parse()
                .map_err(|e| corrupt("payment", row.payment_id, e))?,
            status: row
                .status
                .parse()
                .map_err(|e| corrupt("payment", row.payment_id, e))?,
            payment_id: row.payment_id,
            receipt_number: row.receipt_number,
            invoice_id: row.invoice_id,
            customer_id: row.customer_id,
            amount: Money::from_minor(row.amount),
            payment_date: row.payment_date,
            reference_number: row.reference_number,
            notes: row.notes,
            recorded_by: row.recorded_by,
            created_utc: row.created_utc,
            voided_utc: row.voided_utc,
            void_reason: row.void_reason,
            voided_by: row.voided_by,
        })
    }
}

// -----------------------------------------------------------------------------
// Database
// -----------------------------------------------------------------------------

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "water-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_invoice_row(&self, id: Uuid) -> BillingResult<Option<InvoiceRow>> {
        sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE invoice_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("Failed to get invoice", e))
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> BillingResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Health check failed", e))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Subscription types
    // -------------------------------------------------------------------------

    #[instrument(skip(self, subscription), fields(name = %subscription.name))]
    async fn insert_subscription_type(
        &self,
        subscription: &SubscriptionType,
    ) -> BillingResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription_type"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO subscription_types (subscription_type_id, name, description, monthly_fee, registration_fee, maintenance_fee, late_fee_percentage, is_active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(subscription.subscription_type_id)
        .bind(&subscription.name)
        .bind(&subscription.description)
        .bind(subscription.monthly_fee.minor_units())
        .bind(subscription.registration_fee.minor_units())
        .bind(subscription.maintenance_fee.minor_units())
        .bind(subscription.late_fee_percentage)
        .bind(subscription.is_active)
        .bind(subscription.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::conflict(format!(
                    "Subscription type '{}' already exists",
                    subscription.name
                ))
            } else {
                storage("Failed to create subscription type", e)
            }
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_subscription_type(&self, id: Uuid) -> BillingResult<Option<SubscriptionType>> {
        let row = sqlx::query_as::<_, SubscriptionTypeRow>(
            "SELECT * FROM subscription_types WHERE subscription_type_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to get subscription type", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn set_subscription_type_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> BillingResult<Option<SubscriptionType>> {
        let row = sqlx::query_as::<_, SubscriptionTypeRow>(
            "UPDATE subscription_types SET is_active = $2 WHERE subscription_type_id = $1 RETURNING *",
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to update subscription type", e))?;

        Ok(row.map(Into::into))
    }

    // -------------------------------------------------------------------------
    // Customers
    // -------------------------------------------------------------------------

    #[instrument(skip(self, customer), fields(customer_id = %customer.customer_id))]
    async fn insert_customer(&self, customer: &Customer) -> BillingResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_customer"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO customers (customer_id, name, meter_number, subscription_type_id, status, registration_date, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(customer.customer_id)
        .bind(&customer.name)
        .bind(&customer.meter_number)
        .bind(customer.subscription_type_id)
        .bind(customer.status.as_str())
        .bind(customer.registration_date)
        .bind(customer.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::conflict(format!(
                    "Meter number '{}' is already assigned",
                    customer.meter_number.as_deref().unwrap_or_default()
                ))
            } else {
                storage("Failed to create customer", e)
            }
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_customer(&self, id: Uuid) -> BillingResult<Option<Customer>> {
        sqlx::query_as::<_, CustomerRow>("SELECT * FROM customers WHERE customer_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("Failed to get customer", e))?
            .map(Customer::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn list_customers(
        &self,
        status: Option<CustomerStatus>,
    ) -> BillingResult<Vec<Customer>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_customers"])
            .start_timer();

        let rows = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT * FROM customers
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_utc, customer_id
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list customers", e))?;

        timer.observe_duration();
        rows.into_iter().map(Customer::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn set_customer_status(
        &self,
        id: Uuid,
        status: CustomerStatus,
    ) -> BillingResult<Option<Customer>> {
        sqlx::query_as::<_, CustomerRow>(
            "UPDATE customers SET status = $2 WHERE customer_id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to update customer status", e))?
        .map(Customer::try_from)
        .transpose()
    }

    // -------------------------------------------------------------------------
    // Water rates
    // -------------------------------------------------------------------------

    #[instrument(skip(self, rate), fields(subscription_type_id = %rate.subscription_type_id, effective_date = %rate.effective_date))]
    async fn insert_rate(&self, rate: &WaterRate) -> BillingResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_rate"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO water_rates (rate_id, subscription_type_id, category_id, amount_per_m3, effective_date, active, description, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(rate.rate_id)
        .bind(rate.subscription_type_id)
        .bind(rate.category_id)
        .bind(rate.amount_per_m3.minor_units())
        .bind(rate.effective_date)
        .bind(rate.active)
        .bind(&rate.description)
        .bind(rate.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::conflict(format!(
                    "An active rate already takes effect on {} for this subscription type and category",
                    rate.effective_date
                ))
            } else {
                storage("Failed to create rate", e)
            }
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_rate(&self, id: Uuid) -> BillingResult<Option<WaterRate>> {
        let row = sqlx::query_as::<_, WaterRateRow>("SELECT * FROM water_rates WHERE rate_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("Failed to get rate", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn set_rate_active(&self, id: Uuid, active: bool) -> BillingResult<Option<WaterRate>> {
        let row = sqlx::query_as::<_, WaterRateRow>(
            "UPDATE water_rates SET active = $2 WHERE rate_id = $1 RETURNING *",
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::conflict(
                    "Another active rate already takes effect on the same date for this subscription type and category",
                )
            } else {
                storage("Failed to update rate", e)
            }
        })?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn rates_for_subscription(
        &self,
        subscription_type_id: Uuid,
    ) -> BillingResult<Vec<WaterRate>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rates_for_subscription"])
            .start_timer();

        let rows = sqlx::query_as::<_, WaterRateRow>(
            r#"
            SELECT * FROM water_rates
            WHERE subscription_type_id = $1
            ORDER BY effective_date DESC, created_utc DESC
            "#,
        )
        .bind(subscription_type_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list rates", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // -------------------------------------------------------------------------
    // Usage readings
    // -------------------------------------------------------------------------

    #[instrument(skip(self, usage), fields(customer_id = %usage.customer_id, usage_month = %usage.usage_month))]
    async fn insert_usage(
        &self,
        usage: &WaterUsage,
        previous_usage_id: Option<Uuid>,
    ) -> BillingResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_usage"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage("Failed to begin transaction", e))?;

        // Serialises readings per customer so the meter chain cannot fork.
        sqlx::query_scalar::<_, Uuid>(
            "SELECT customer_id FROM customers WHERE customer_id = $1 FOR UPDATE",
        )
        .bind(usage.customer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage("Failed to lock customer", e))?
        .ok_or_else(|| BillingError::not_found("Customer", usage.customer_id))?;

        let same_month = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM water_usages WHERE customer_id = $1 AND usage_month = $2)",
        )
        .bind(usage.customer_id)
        .bind(usage.usage_month)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage("Failed to check reading month", e))?;
        if same_month {
            return Err(BillingError::conflict(format!(
                "A reading for {} already exists for this customer",
                usage.usage_month.format("%Y-%m")
            )));
        }

        let latest = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT usage_id FROM water_usages
            WHERE customer_id = $1
            ORDER BY usage_month DESC
            LIMIT 1
            "#,
        )
        .bind(usage.customer_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage("Failed to load latest reading", e))?;
        if latest != previous_usage_id {
            return Err(BillingError::conflict(
                "Meter readings for this customer changed concurrently; retry",
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO water_usages (usage_id, customer_id, usage_month, meter_start, meter_end, usage_m3, amount_calculated, is_anomaly, notes, invoice_id, recorded_by, recorded_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(usage.usage_id)
        .bind(usage.customer_id)
        .bind(usage.usage_month)
        .bind(usage.meter_start)
        .bind(usage.meter_end)
        .bind(usage.usage_m3)
        .bind(usage.amount_calculated.minor_units())
        .bind(usage.is_anomaly)
        .bind(&usage.notes)
        .bind(usage.invoice_id)
        .bind(&usage.recorded_by)
        .bind(usage.recorded_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::conflict("A reading for this month already exists")
            } else {
                storage("Failed to insert reading", e)
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| storage("Failed to commit transaction", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, usage), fields(usage_id = %usage.usage_id))]
    async fn update_usage(&self, usage: &WaterUsage) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE water_usages
            SET meter_start = $2, meter_end = $3, usage_m3 = $4, is_anomaly = $5, notes = $6
            WHERE usage_id = $1 AND invoice_id IS NULL
            "#,
        )
        .bind(usage.usage_id)
        .bind(usage.meter_start)
        .bind(usage.meter_end)
        .bind(usage.usage_m3)
        .bind(usage.is_anomaly)
        .bind(&usage.notes)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("Failed to update reading", e))?;

        if result.rows_affected() == 0 {
            return match self.get_usage(usage.usage_id).await? {
                None => Err(BillingError::not_found("Usage", usage.usage_id)),
                Some(_) => Err(BillingError::invalid_state(
                    "Reading has been invoiced and can no longer change",
                )),
            };
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_usage(&self, id: Uuid) -> BillingResult<Option<WaterUsage>> {
        let row =
            sqlx::query_as::<_, WaterUsageRow>("SELECT * FROM water_usages WHERE usage_id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage("Failed to get reading", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_usage(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> BillingResult<Option<WaterUsage>> {
        let row = sqlx::query_as::<_, WaterUsageRow>(
            "SELECT * FROM water_usages WHERE customer_id = $1 AND usage_month = $2",
        )
        .bind(customer_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to find reading", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn usage_history(
        &self,
        customer_id: Uuid,
        limit: Option<usize>,
    ) -> BillingResult<Vec<WaterUsage>> {
        let rows = sqlx::query_as::<_, WaterUsageRow>(
            r#"
            SELECT * FROM water_usages
            WHERE customer_id = $1
            ORDER BY usage_month DESC
            LIMIT $2
            "#,
        )
        .bind(customer_id)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to load usage history", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn list_usages(&self, range: DateRange) -> BillingResult<Vec<WaterUsage>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_usages"])
            .start_timer();

        let rows = sqlx::query_as::<_, WaterUsageRow>(
            r#"
            SELECT * FROM water_usages
            WHERE ($1::date IS NULL OR usage_month >= $1)
              AND ($2::date IS NULL OR usage_month <= $2)
            ORDER BY usage_month, customer_id
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list usages", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // -------------------------------------------------------------------------
    // Invoices and payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id, customer_id = %invoice.customer_id))]
    async fn insert_invoice(&self, invoice: &Invoice, usage_charge: Money) -> BillingResult<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO invoices (invoice_id, invoice_number, customer_id, usage_id, billing_period, line_items, subtotal, tax_percentage, tax_amount, total_amount, amount_paid, amount_due, status, issue_date, due_date, version, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.customer_id)
        .bind(invoice.usage_id)
        .bind(invoice.billing_period)
        .bind(Json(&invoice.line_items))
        .bind(invoice.subtotal.minor_units())
        .bind(invoice.tax_percentage)
        .bind(invoice.tax_amount.minor_units())
        .bind(invoice.total_amount.minor_units())
        .bind(invoice.amount_paid.minor_units())
        .bind(invoice.amount_due.minor_units())
        .bind(invoice.status.as_str())
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.version)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::conflict(format!(
                    "Invoice number {} already exists",
                    invoice.invoice_number
                ))
            } else {
                storage("Failed to insert invoice", e)
            }
        })?;

        if let Some(usage_id) = invoice.usage_id {
            let linked = sqlx::query(
                r#"
                UPDATE water_usages SET invoice_id = $1, amount_calculated = $2
                WHERE usage_id = $3 AND invoice_id IS NULL
                "#,
            )
            .bind(invoice.invoice_id)
            .bind(usage_charge.minor_units())
            .bind(usage_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage("Failed to link reading", e))?;

            if linked.rows_affected() == 0 {
                return Err(BillingError::conflict(format!(
                    "Reading {} is already invoiced",
                    usage_id
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| storage("Failed to commit transaction", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        self.fetch_invoice_row(id)
            .await?
            .map(Invoice::try_from)
            .transpose()
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(&self, filter: &ListInvoicesFilter) -> BillingResult<Vec<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT * FROM invoices
            WHERE ($1::uuid IS NULL OR customer_id = $1)
              AND (cardinality($2::text[]) = 0 OR status = ANY($2))
              AND ($3::date IS NULL OR issue_date >= $3)
              AND ($4::date IS NULL OR issue_date <= $4)
            ORDER BY issue_date, invoice_number
            "#,
        )
        .bind(filter.customer_id)
        .bind(&statuses)
        .bind(filter.issued_from)
        .bind(filter.issued_to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list invoices", e))?;

        timer.observe_duration();
        rows.into_iter().map(Invoice::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn has_billable_invoices(&self, customer_id: Uuid) -> BillingResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM invoices WHERE customer_id = $1 AND status <> 'void')",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage("Failed to check customer invoices", e))
    }

    #[instrument(
        skip(self, commit),
        fields(
            invoice_id = %commit.invoice.invoice_id,
            expected_version = commit.expected_version,
        )
    )]
    async fn commit_invoice(&self, commit: InvoiceCommit<'_>) -> BillingResult<Invoice> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_invoice"])
            .start_timer();

        let invoice = commit.invoice;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage("Failed to begin transaction", e))?;

        let updated = sqlx::query_as::<_, InvoiceRow>(
            r#"
            UPDATE invoices
            SET amount_paid = $3, amount_due = $4, status = $5, version = version + 1,
                updated_utc = $6, voided_utc = $7, void_reason = $8
            WHERE invoice_id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(commit.expected_version)
        .bind(invoice.amount_paid.minor_units())
        .bind(invoice.amount_due.minor_units())
        .bind(invoice.status.as_str())
        .bind(invoice.updated_utc)
        .bind(invoice.voided_utc)
        .bind(&invoice.void_reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage("Failed to update invoice", e))?;

        let Some(updated) = updated else {
            drop(tx);
            return match self.fetch_invoice_row(invoice.invoice_id).await? {
                Some(_) => Err(BillingError::StaleVersion(invoice.invoice_id)),
                None => Err(BillingError::not_found("Invoice", invoice.invoice_id)),
            };
        };

        match commit.payment {
            Some(PaymentWrite::Insert(payment)) => {
                sqlx::query(
                    r#"
                    INSERT INTO payments (payment_id, receipt_number, invoice_id, customer_id, amount, method, payment_date, reference_number, status, notes, recorded_by, created_utc)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(payment.payment_id)
                .bind(&payment.receipt_number)
                .bind(payment.invoice_id)
                .bind(payment.customer_id)
                .bind(payment.amount.minor_units())
                .bind(payment.method.as_str())
                .bind(payment.payment_date)
                .bind(&payment.reference_number)
                .bind(payment.status.as_str())
                .bind(&payment.notes)
                .bind(&payment.recorded_by)
                .bind(payment.created_utc)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        BillingError::conflict(format!(
                            "Payment {} already recorded",
                            payment.payment_id
                        ))
                    } else {
                        storage("Failed to insert payment", e)
                    }
                })?;
            }
            Some(PaymentWrite::Void(payment)) => {
                let result = sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = $2, voided_utc = $3, void_reason = $4, voided_by = $5
                    WHERE payment_id = $1 AND status = 'completed'
                    "#,
                )
                .bind(payment.payment_id)
                .bind(payment.status.as_str())
                .bind(payment.voided_utc)
                .bind(&payment.void_reason)
                .bind(&payment.voided_by)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage("Failed to void payment", e))?;

                if result.rows_affected() == 0 {
                    return Err(BillingError::invalid_state(format!(
                        "Payment {} is no longer completed",
                        payment.receipt_number
                    )));
                }
            }
            None => {}
        }

        tx.commit()
            .await
            .map_err(|e| storage("Failed to commit transaction", e))?;

        timer.observe_duration();
        Invoice::try_from(updated)
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE payment_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("Failed to get payment", e))?
            .map(Payment::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn payments_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY created_utc",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list invoice payments", e))?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_payments(&self, range: DateRange) -> BillingResult<Vec<Payment>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payments
            WHERE ($1::date IS NULL OR payment_date >= $1)
              AND ($2::date IS NULL OR payment_date <= $2)
            ORDER BY payment_date, created_utc
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list payments", e))?;

        timer.observe_duration();
        rows.into_iter().map(Payment::try_from).collect()
    }
}
