use crate::models::{CreateCustomer, CreateSubscriptionType, Money};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriptionTypeRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description is too long"))]
    pub description: Option<String>,

    #[validate(range(min = 0, max = 1_000_000_000_000i64, message = "Monthly fee must be between 0 and 1,000,000,000,000"))]
    #[serde(default)]
    pub monthly_fee: i64,

    #[validate(range(min = 0, max = 1_000_000_000_000i64, message = "Registration fee must be between 0 and 1,000,000,000,000"))]
    #[serde(default)]
    pub registration_fee: i64,

    #[validate(range(min = 0, max = 1_000_000_000_000i64, message = "Maintenance fee must be between 0 and 1,000,000,000,000"))]
    #[serde(default)]
    pub maintenance_fee: i64,

    #[serde(default)]
    pub late_fee_percentage: Decimal,
}

impl From<CreateSubscriptionTypeRequest> for CreateSubscriptionType {
    fn from(req: CreateSubscriptionTypeRequest) -> Self {
        Self {
            name: req.name,
            description: req.description,
            monthly_fee: Money::from_minor(req.monthly_fee),
            registration_fee: Money::from_minor(req.registration_fee),
            maintenance_fee: Money::from_minor(req.maintenance_fee),
            late_fee_percentage: req.late_fee_percentage,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(length(max = 50, message = "Meter number is too long"))]
    pub meter_number: Option<String>,

    pub subscription_type_id: Uuid,

    /// Defaults to today.
    pub registration_date: Option<NaiveDate>,
}

impl From<CreateCustomerRequest> for CreateCustomer {
    fn from(req: CreateCustomerRequest) -> Self {
        Self {
            name: req.name,
            meter_number: req.meter_number,
            subscription_type_id: req.subscription_type_id,
            registration_date: req
                .registration_date
                .unwrap_or_else(|| Utc::now().date_naive()),
        }
    }
}

/// Optional body for customer status changes.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CustomerStatusRequest {
    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}
