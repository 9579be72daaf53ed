//! Subscription types and the customers billed under them.

use super::Money;
use crate::error::BillingError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Tariff plan a customer subscribes to. Fees are fixed per invoice; the
/// volumetric price lives in [`super::WaterRate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionType {
    pub subscription_type_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub monthly_fee: Money,
    pub registration_fee: Money,
    pub maintenance_fee: Money,
    pub late_fee_percentage: Decimal,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a subscription type.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionType {
    pub name: String,
    pub description: Option<String>,
    pub monthly_fee: Money,
    pub registration_fee: Money,
    pub maintenance_fee: Money,
    pub late_fee_percentage: Decimal,
}

/// Customer account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Suspended,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
            CustomerStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for CustomerStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CustomerStatus::Active),
            "inactive" => Ok(CustomerStatus::Inactive),
            "suspended" => Ok(CustomerStatus::Suspended),
            other => Err(BillingError::validation(format!(
                "Unknown customer status '{}'",
                other
            ))),
        }
    }
}

/// Metered customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: Uuid,
    pub name: String,
    pub meter_number: Option<String>,
    pub subscription_type_id: Uuid,
    pub status: CustomerStatus,
    pub registration_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub name: String,
    pub meter_number: Option<String>,
    pub subscription_type_id: Uuid,
    pub registration_date: NaiveDate,
}
