//! Configuration module for water-billing-service.

use crate::services::{AnomalyPolicy, LedgerSettings};
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub billing: BillingSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub grace_period_days: i64,
    pub tax_percentage: Decimal,
    pub anomaly_window: usize,
    pub anomaly_factor: Decimal,
    pub anomaly_ceiling_m3: Decimal,
    pub run_concurrency: usize,
    /// Zero disables the background sweeper.
    pub overdue_sweep_interval_secs: u64,
}

impl Default for BillingSettings {
    fn default() -> Self {
        let ledger = LedgerSettings::default();
        let anomaly = AnomalyPolicy::default();
        Self {
            grace_period_days: ledger.grace_period_days,
            tax_percentage: ledger.tax_percentage,
            anomaly_window: anomaly.window,
            anomaly_factor: anomaly.factor,
            anomaly_ceiling_m3: anomaly.ceiling_m3,
            run_concurrency: 8,
            overdue_sweep_interval_secs: 3600,
        }
    }
}

impl BillingSettings {
    pub fn ledger(&self) -> LedgerSettings {
        LedgerSettings {
            grace_period_days: self.grace_period_days,
            tax_percentage: self.tax_percentage,
        }
    }

    pub fn anomaly_policy(&self) -> AnomalyPolicy {
        AnomalyPolicy {
            window: self.anomaly_window,
            factor: self.anomaly_factor,
            ceiling_m3: self.anomaly_ceiling_m3,
        }
    }

    pub fn overdue_sweep_interval(&self) -> Option<Duration> {
        (self.overdue_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.overdue_sweep_interval_secs))
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.grace_period_days < 0 {
            return Err(config_error("BILLING_GRACE_PERIOD_DAYS cannot be negative"));
        }
        if self.tax_percentage < Decimal::ZERO {
            return Err(config_error("BILLING_TAX_PERCENTAGE cannot be negative"));
        }
        if self.anomaly_window == 0 {
            return Err(config_error("BILLING_ANOMALY_WINDOW must be at least 1"));
        }
        if self.anomaly_factor <= Decimal::ZERO {
            return Err(config_error("BILLING_ANOMALY_FACTOR must be positive"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

/// Parse an optional variable; present but malformed is an error.
fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| config_error(&format!("{} has an invalid value '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = BillingSettings::default();

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
            _ => None,
        };

        let billing = BillingSettings {
            grace_period_days: parse_env("BILLING_GRACE_PERIOD_DAYS", defaults.grace_period_days)?,
            tax_percentage: parse_env("BILLING_TAX_PERCENTAGE", defaults.tax_percentage)?,
            anomaly_window: parse_env("BILLING_ANOMALY_WINDOW", defaults.anomaly_window)?,
            anomaly_factor: parse_env("BILLING_ANOMALY_FACTOR", defaults.anomaly_factor)?,
            anomaly_ceiling_m3: parse_env("BILLING_ANOMALY_CEILING_M3", defaults.anomaly_ceiling_m3)?,
            run_concurrency: parse_env("BILLING_RUN_CONCURRENCY", defaults.run_concurrency)?,
            overdue_sweep_interval_secs: parse_env(
                "OVERDUE_SWEEP_INTERVAL_SECS",
                defaults.overdue_sweep_interval_secs,
            )?,
        };
        billing.validate()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "water-billing-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database,
            billing,
        })
    }

    /// In-memory configuration on a random port, for tests.
    pub fn for_tests() -> Self {
        Self {
            common: core_config::Config {
                port: 0,
                ..core_config::Config::default()
            },
            service_name: "water-billing-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: None,
            billing: BillingSettings {
                overdue_sweep_interval_secs: 0,
                ..BillingSettings::default()
            },
        }
    }
}
