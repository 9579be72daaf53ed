#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use uuid::Uuid;
use water_billing_service::config::BillingConfig;
use water_billing_service::middleware::actor::{OPERATOR_ID_HEADER, OPERATOR_ROLE_HEADER};
use water_billing_service::models::{
    Actor, CreateCustomer, CreatePayment, CreateSubscriptionType, CreateWaterRate, Customer,
    Invoice, Money, PaymentMethod, RecordUsage, Role, SubscriptionType, WaterRate, WaterUsage,
};
use water_billing_service::services::{BillingStore, MemoryStore};
use water_billing_service::startup::{AppState, Application};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();
    });
}

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("valid test date")
}

pub fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

pub fn operator() -> Actor {
    Actor::new("operator-1", Role::Operator)
}

pub fn money(units: i64) -> Money {
    Money::from_minor(units)
}

/// Billing components wired over a fresh in-memory store.
pub struct TestCore {
    pub state: AppState,
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_config(BillingConfig::for_tests())
    }

    pub fn with_config(config: BillingConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: BillingConfig, store: Arc<dyn BillingStore>) -> Self {
        init_tracing();
        let state = AppState::new(config, store);
        Self { state }
    }

    pub async fn subscription(
        &self,
        monthly_fee: i64,
        registration_fee: i64,
        maintenance_fee: i64,
    ) -> SubscriptionType {
        self.state
            .accounts
            .create_subscription_type(
                CreateSubscriptionType {
                    name: format!("Residential {}", Uuid::new_v4()),
                    description: None,
                    monthly_fee: money(monthly_fee),
                    registration_fee: money(registration_fee),
                    maintenance_fee: money(maintenance_fee),
                    late_fee_percentage: Decimal::from(2),
                },
                &admin(),
            )
            .await
            .expect("create subscription type")
    }

    pub async fn rate(&self, subscription_type_id: Uuid, amount: i64, effective: &str) -> WaterRate {
        self.state
            .rates
            .create_rate(
                CreateWaterRate {
                    subscription_type_id,
                    category_id: None,
                    amount_per_m3: money(amount),
                    effective_date: date(effective),
                    description: None,
                },
                &admin(),
            )
            .await
            .expect("create rate")
    }

    pub async fn customer(&self, subscription_type_id: Uuid) -> Customer {
        self.state
            .accounts
            .register_customer(
                CreateCustomer {
                    name: "Budi Santoso".to_string(),
                    meter_number: None,
                    subscription_type_id,
                    registration_date: date("2023-12-01"),
                },
                &operator(),
            )
            .await
            .expect("register customer")
    }

    pub async fn reading(&self, customer_id: Uuid, month: &str, meter_end: i64) -> WaterUsage {
        self.state
            .usage
            .record(
                RecordUsage {
                    customer_id,
                    usage_month: date(month),
                    meter_end: Decimal::from(meter_end),
                    notes: None,
                },
                &operator(),
            )
            .await
            .expect("record reading")
    }

    pub async fn invoice(&self, customer_id: Uuid, usage_id: Uuid, issued: &str) -> Invoice {
        self.state
            .ledger
            .generate_for_usage(customer_id, usage_id, Some(date(issued)))
            .await
            .expect("generate invoice")
    }

    /// Monthly 50,000, maintenance 10,000, no registration fee, rate 5,000/m³
    /// from 2024-01-01, and a January reading of 40 m³ issued 2024-01-31.
    pub async fn scenario_invoice(&self) -> Invoice {
        let subscription = self.subscription(50_000, 0, 10_000).await;
        self.rate(subscription.subscription_type_id, 5_000, "2024-01-01")
            .await;
        let customer = self.customer(subscription.subscription_type_id).await;
        let usage = self.reading(customer.customer_id, "2024-01-01", 40).await;
        self.invoice(customer.customer_id, usage.usage_id, "2024-01-31")
            .await
    }
}

pub fn payment(invoice_id: Uuid, amount: i64, method: PaymentMethod, reference: Option<&str>) -> CreatePayment {
    CreatePayment {
        invoice_id,
        amount: money(amount),
        method,
        reference_number: reference.map(str::to_string),
        payment_date: date("2024-02-01"),
        notes: None,
    }
}

pub fn bank_transfer(invoice_id: Uuid, amount: i64, reference: &str) -> CreatePayment {
    payment(invoice_id, amount, PaymentMethod::BankTransfer, Some(reference))
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        init_tracing();
        let app = Application::build_with_store(BillingConfig::for_tests(), Arc::new(MemoryStore::new()))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_as(
        &self,
        role: &str,
        path: &str,
        body: serde_json::Value,
    ) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(OPERATOR_ID_HEADER, format!("{}-1", role))
            .header(OPERATOR_ROLE_HEADER, role)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.post_as("operator", path, body).await
    }

    pub async fn post_admin(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.post_as("admin", path, body).await
    }
}
